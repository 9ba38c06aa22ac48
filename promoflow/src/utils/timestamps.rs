//! Timestamp helpers.
//!
//! Every timestamp the orchestrator records (artifact creation, action
//! start/end, bridge `last_modified`) uses the same fixed-offset ISO 8601
//! form so that records written by different processes compare textually.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// The format is `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// # Examples
///
/// ```
/// use promoflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as an ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Parses an RFC 3339 / ISO 8601 timestamp (`Z` or numeric offset).
///
/// # Errors
///
/// Returns `TimestampError` if the input is empty or malformed.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimestampError::InvalidFormat(trimmed.to_string()))
}
