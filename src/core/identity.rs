//! Polish tax identifier (NIP) parsing and checksum validation.
//!
//! [`Nip::parse`] checks format only: separators are stripped and the
//! remainder must be exactly ten digits. The weighted mod-11 control
//! digit check is offered separately as [`nip_checksum_ok`] so callers
//! choose how strict to be; the authority itself accepts some legacy
//! identifiers that fail the checksum.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Weights applied to the first nine digits when computing the NIP
/// control digit.
const CHECKSUM_WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];

/// Error returned when a NIP fails format validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid NIP '{value}': {reason}")]
pub struct NipError {
    /// The rejected input value.
    pub value: String,
    /// Why the value failed validation.
    pub reason: String,
}

impl NipError {
    fn new(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<NipError> for crate::KsefError {
    fn from(err: NipError) -> Self {
        crate::KsefError::Configuration(err.to_string())
    }
}

/// A Polish tax identifier (NIP) in canonical form.
///
/// Stored as exactly ten ASCII digits with no separators. Construction
/// goes through [`Nip::parse`], which accepts common display forms
/// ("526-025-02-74", "PL5260250274").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nip(String);

impl Nip {
    /// Parse a NIP from user input, validating format only.
    ///
    /// Strips surrounding whitespace, an optional `PL` country prefix
    /// and common separators (spaces, hyphens) before checking that the
    /// remainder is exactly ten digits.
    pub fn parse(input: &str) -> Result<Self, NipError> {
        let trimmed = input.trim();
        let rest = trimmed
            .strip_prefix("PL")
            .or_else(|| trimmed.strip_prefix("pl"))
            .unwrap_or(trimmed);

        let digits: String = rest.chars().filter(|c| !matches!(c, ' ' | '-')).collect();

        if digits.is_empty() {
            return Err(NipError::new(input, "empty after stripping separators"));
        }
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(NipError::new(
                input,
                format!("unexpected character '{bad}'"),
            ));
        }
        if digits.len() != 10 {
            return Err(NipError::new(
                input,
                format!("expected exactly 10 digits, got {}", digits.len()),
            ));
        }

        Ok(Self(digits))
    }

    /// The canonical ten-digit form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Nip {
    type Err = NipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Nip {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Nip {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

/// Check the weighted mod-11 control digit of a parsed NIP.
///
/// The first nine digits are multiplied by the weights 6, 5, 7, 2, 3,
/// 4, 5, 6, 7; the sum mod 11 must equal the tenth digit. A control
/// value of 10 cannot be represented in one digit, so such numbers are
/// never issued.
pub fn nip_checksum_ok(nip: &Nip) -> bool {
    let d: Vec<u32> = nip.0.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 10 {
        return false;
    }
    let sum: u32 = d
        .iter()
        .zip(CHECKSUM_WEIGHTS.iter())
        .map(|(digit, weight)| digit * weight)
        .sum();
    let control = sum % 11;
    control != 10 && control == d[9]
}
