pub mod display_name;
pub mod donation;

pub use display_name::{
    normalize_display_name, validate_display_name, NameError, MAX_DISPLAY_NAME_LENGTH,
};
pub use donation::DonationRecord;
