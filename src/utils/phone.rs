//! Phone number validation and normalization
//!
//! All dial targets entering the provider layer must be E.164: a leading `+`
//! followed by 1-15 digits, first digit non-zero. Adapters reject anything
//! else before a vendor request is made.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static E164_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9]\d{0,14}$").expect("E.164 regex is valid"));

/// Error for phone numbers that cannot be normalized to E.164.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid phone number '{input}': {reason}")]
pub struct PhoneNumberError {
    /// The offending input, as received
    pub input: String,
    /// Why validation failed
    pub reason: &'static str,
}

/// Normalize a dialable phone number to E.164.
///
/// Accepts common formatting noise (spaces, dashes, dots, parentheses) and a
/// `00` international prefix, then validates the result against the E.164
/// shape. Returns the canonical `+<digits>` form.
///
/// # Examples
///
/// ```
/// use voxassist_gateway::utils::normalize_e164;
///
/// assert_eq!(normalize_e164("+1 (415) 555-0100").unwrap(), "+14155550100");
/// assert_eq!(normalize_e164("0044 20 7946 0958").unwrap(), "+442079460958");
/// assert!(normalize_e164("555-0100").is_err());
/// ```
pub fn normalize_e164(input: &str) -> Result<String, PhoneNumberError> {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if stripped.is_empty() {
        return Err(PhoneNumberError {
            input: input.to_string(),
            reason: "empty after stripping formatting",
        });
    }

    // Allow the 00 international dialing prefix as an alias for +
    let candidate = if let Some(rest) = stripped.strip_prefix("00") {
        format!("+{rest}")
    } else {
        stripped
    };

    if !candidate.starts_with('+') {
        return Err(PhoneNumberError {
            input: input.to_string(),
            reason: "missing + country-code prefix",
        });
    }

    if !E164_RE.is_match(&candidate) {
        return Err(PhoneNumberError {
            input: input.to_string(),
            reason: "not a valid E.164 number (+ followed by 1-15 digits)",
        });
    }

    Ok(candidate)
}
