pub mod bridge;
pub mod capture;
pub mod host;
pub mod pattern;
pub mod rules;
pub mod scraper;

pub use bridge::{BridgeError, OwnerContext};
pub use capture::{FrameCapture, Rect, Scale, Size, SurfaceDimensions};
pub use host::{HostClient, RegionSnapshot};
pub use pattern::{extract, parse_amount, strip_tags, ExtractError};
pub use rules::{default_rules, RegionId, Screen, ScrapeRule, TextRule};
pub use scraper::{ScrapeError, Scraper};
