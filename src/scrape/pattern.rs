use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("pattern `{pattern}` did not match `{text}`")]
    NotFound { pattern: String, text: String },
    #[error("`{0}` is not a non-negative whole number")]
    MalformedNumber(String),
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

/// Removes `<col=ff0000>`-style markup from interface text.
pub fn strip_tags(text: &str) -> String {
    tag_pattern().replace_all(text, "").into_owned()
}

/// Strips markup from `text` and returns the first capture group of
/// `pattern`. The pattern must declare exactly one group.
pub fn extract(text: &str, pattern: &Regex) -> Result<String, ExtractError> {
    let clean = strip_tags(text);

    pattern
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|group| group.as_str().to_string())
        .ok_or_else(|| ExtractError::NotFound {
            pattern: pattern.as_str().to_string(),
            text: clean,
        })
}

/// Parses a coin value such as `1,234,567`, ignoring thousands separators.
pub fn parse_amount(value: &str) -> Result<u64, ExtractError> {
    let digits: String = value
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}'))
        .collect();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ExtractError::MalformedNumber(value.to_string()));
    }

    digits
        .parse()
        .map_err(|_| ExtractError::MalformedNumber(value.to_string()))
}
