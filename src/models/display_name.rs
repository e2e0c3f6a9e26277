use thiserror::Error;

/// Longest display name the game allows.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name contains characters that are not allowed in display names")]
    InvalidCharacters,
    #[error("name is longer than {MAX_DISPLAY_NAME_LENGTH} characters")]
    TooLong,
}

/// Normalizes text the way the game normalizes display names: non-breaking
/// spaces, underscores and hyphens become spaces, non-ASCII characters are
/// dropped and the result is trimmed.
pub fn normalize_display_name(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '\u{a0}' | '_' | '-' => ' ',
            other => other,
        })
        .filter(char::is_ascii)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Accepts `raw` only if it is already in normalized form, non-empty and
/// within the display name length bound.
pub fn validate_display_name(raw: &str) -> Result<&str, NameError> {
    if raw.is_empty() {
        return Err(NameError::Empty);
    }

    if normalize_display_name(raw) != raw {
        return Err(NameError::InvalidCharacters);
    }

    if raw.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(NameError::TooLong);
    }

    Ok(raw)
}
