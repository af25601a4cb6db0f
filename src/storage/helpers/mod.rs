//! Shared storage helper functions.
//!
//! Timestamp and id encoding shared by storage backends that persist
//! values as text.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::{Result, StorageError};
use crate::model::RewardStatus;

/// Format a timestamp as fixed-width RFC3339 (microseconds, `Z` suffix).
///
/// Fixed width keeps lexicographic order equal to chronological order, which
/// the SQL expiry comparisons rely on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(s)?)
}

pub fn parse_optional_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

pub fn parse_status(s: &str) -> Result<RewardStatus> {
    RewardStatus::parse(s)
        .ok_or_else(|| StorageError::InvalidRecord(format!("unknown reward status '{}'", s)))
}

/// Lowercased, trimmed form used for case-insensitive name lookups.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
