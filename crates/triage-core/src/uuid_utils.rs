//! UUID v7 utilities for time-ordered identifiers.
//!
//! Captures are keyed by UUIDv7 so that id order follows creation order,
//! which gives repositories a stable tie-breaker for FIFO listing.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use triage_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert!(a <= b);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Extract the embedded millisecond timestamp from a UUIDv7.
///
/// Returns `None` for any other UUID version.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(id) {
        return None;
    }
    let bytes = id.as_bytes();
    let mut millis: i64 = 0;
    for b in &bytes[..6] {
        millis = (millis << 8) | i64::from(*b);
    }
    Utc.timestamp_millis_opt(millis).single()
}

/// Check whether a UUID is version 7.
#[inline]
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}
