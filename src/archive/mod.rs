//! Screenshot archival after a send attempt finishes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use image::{ImageFormat, RgbaImage};
use log::info;

use crate::models::DonationRecord;

const FAILED_SUFFIX: &str = " (Failed)";

/// Stores the screenshot of a finished submission. Called exactly once per
/// succeeded or failed attempt.
pub trait Archiver: Send + Sync {
    fn archive(&self, image: &RgbaImage, base_name: &str, success: bool) -> Result<()>;
}

/// `Donation (<from>) (<amount>)`, with a marker appended for failures.
pub fn archive_name(record: &DonationRecord, success: bool) -> String {
    let name = format!(
        "Donation ({}) ({})",
        record.from().unwrap_or_default(),
        format_stack(record.amount()).to_lowercase()
    );

    if success {
        name
    } else {
        name + FAILED_SUFFIX
    }
}

/// Compact stack notation as the game shows it, truncating: `12.3K`,
/// `1.234M`. Values with four digits or fewer are printed as-is.
pub fn format_stack(amount: u64) -> String {
    const SUFFIXES: [&str; 7] = ["", "K", "M", "B", "T", "Q", "E"];

    let digits = amount.to_string();
    if digits.len() <= 4 {
        return digits;
    }

    let power = digits.len() - 1;
    let group = power / 3;
    // Thousandths from a million up, tenths below.
    let decimals = if power >= 6 { 3 } else { 1 };

    let divisor = 10u64.pow((group * 3) as u32);
    let whole = amount / divisor;
    let fraction = (amount % divisor) / 10u64.pow((group * 3 - decimals) as u32);

    let mut fraction = format!("{fraction:0decimals$}");
    while fraction.ends_with('0') {
        fraction.pop();
    }

    if fraction.is_empty() {
        format!("{whole}{}", SUFFIXES[group])
    } else {
        format!("{whole}.{fraction}{}", SUFFIXES[group])
    }
}

/// Writes PNG files into one directory, stamped with the local time.
#[derive(Debug, Clone)]
pub struct DirectoryArchiver {
    dir: PathBuf,
}

impl DirectoryArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Archiver for DirectoryArchiver {
    fn archive(&self, image: &RgbaImage, base_name: &str, success: bool) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create archive directory {}", self.dir.display()))?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let file_name = format!("{} {stamp}.png", sanitize(base_name));
        let path = self.dir.join(file_name);

        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;

        info!(
            "Archived {} screenshot at {}",
            if success { "donation" } else { "failed donation" },
            path.display()
        );
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
