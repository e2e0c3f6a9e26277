use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

/// Evidence of one value transfer, as scraped from the client screen.
///
/// Immutable apart from the sender name, which can be supplied later through
/// [`DonationRecord::with_from`]; that produces a new record and leaves the
/// original untouched.
#[derive(Clone, PartialEq)]
pub struct DonationRecord {
    /// Display name of the donor. `None` when the screen did not show it.
    from: Option<String>,
    /// Display name of the receiver (the local player).
    to: String,
    /// Value in coins.
    amount: u64,
    /// Trade, loot chest or price check screen, cropped to the interface.
    screenshot: Arc<RgbaImage>,
}

impl DonationRecord {
    pub fn new(from: Option<String>, to: String, amount: u64, screenshot: RgbaImage) -> Self {
        Self {
            from,
            to,
            amount,
            screenshot: Arc::new(screenshot),
        }
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn screenshot(&self) -> &RgbaImage {
        &self.screenshot
    }

    /// Returns a copy of this record with the sender replaced. The screenshot
    /// buffer is shared, not copied.
    pub fn with_from(&self, from: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: self.to.clone(),
            amount: self.amount,
            screenshot: Arc::clone(&self.screenshot),
        }
    }
}

impl fmt::Debug for DonationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DonationRecord")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("amount", &self.amount)
            .field(
                "screenshot",
                &format_args!("{}x{}", self.screenshot.width(), self.screenshot.height()),
            )
            .finish()
    }
}
