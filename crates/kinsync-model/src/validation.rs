//! Input shape validation shared by every write endpoint

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LOGIN_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6}$").expect("valid regex"));

// Digits with optional leading '+', spaces or dashes between groups.
static CONTACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{5,18}[0-9]$").expect("valid regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

/// Malformed input rejected before any store access
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Required field missing or blank
    #[error("{0} is required")]
    Required(&'static str),

    /// Field longer than allowed
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// Login code is not six ASCII digits
    #[error("login code must be exactly 6 digits")]
    InvalidLoginCode,

    /// Contact is not a phone-like string
    #[error("contact is not a valid phone number")]
    InvalidContact,

    /// Email address shape is wrong
    #[error("email address is malformed")]
    InvalidEmail,
}

/// Six-digit numeric login code, unique across the whole store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoginCode(String);

impl LoginCode {
    /// Parse and validate a login code
    ///
    /// # Errors
    /// `ValidationError::InvalidLoginCode` unless the input is exactly six digits
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if LOGIN_CODE_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ValidationError::InvalidLoginCode)
        }
    }

    /// Borrow the digits
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LoginCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LoginCode> for String {
    fn from(value: LoginCode) -> Self {
        value.0
    }
}

impl std::fmt::Display for LoginCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trimmed, non-empty text no longer than `max` characters
///
/// # Errors
/// `Required` for blank input, `TooLong` past the limit
pub fn required_text(field: &'static str, raw: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required(field));
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

/// Normalised contact (surrounding whitespace removed)
///
/// # Errors
/// `InvalidContact` when the value is not phone-like
pub fn contact(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required("contact"));
    }
    if CONTACT_RE.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ValidationError::InvalidContact)
    }
}

/// Lower-cased email address
///
/// # Errors
/// `InvalidEmail` when the shape is wrong
pub fn email(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if EMAIL_RE.is_match(trimmed) {
        Ok(trimmed.to_lowercase())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_code_accepts_six_digits() {
        assert_eq!(LoginCode::parse(" 123456 ").unwrap().as_str(), "123456");
    }

    #[test]
    fn login_code_rejects_other_shapes() {
        for raw in ["12345", "1234567", "12a456", "", "١٢٣٤٥٦"] {
            assert_eq!(LoginCode::parse(raw), Err(ValidationError::InvalidLoginCode), "{raw}");
        }
    }

    #[test]
    fn login_code_deserialization_validates() {
        assert!(serde_json::from_str::<LoginCode>("\"654321\"").is_ok());
        assert!(serde_json::from_str::<LoginCode>("\"65432\"").is_err());
    }

    #[test]
    fn required_text_trims_and_limits() {
        assert_eq!(required_text("text", "  hi ", 10).unwrap(), "hi");
        assert_eq!(required_text("text", "   ", 10), Err(ValidationError::Required("text")));
        assert_eq!(
            required_text("text", "abcdef", 5),
            Err(ValidationError::TooLong { field: "text", max: 5 })
        );
    }

    #[test]
    fn contact_shapes() {
        assert!(contact("+1 555-010-9999").is_ok());
        assert!(contact("9876543210").is_ok());
        assert_eq!(contact("call me"), Err(ValidationError::InvalidContact));
        assert_eq!(contact(""), Err(ValidationError::Required("contact")));
    }

    #[test]
    fn email_is_lowercased() {
        assert_eq!(email("Admin@Example.ORG").unwrap(), "admin@example.org");
        assert_eq!(email("nope"), Err(ValidationError::InvalidEmail));
    }
}
