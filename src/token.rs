//! Token lifetime arithmetic.
//!
//! The store keeps the moment a token was issued (`now`) and how long it is
//! valid for (`expires_in`), both in seconds. Everything here is pure so the
//! expiry rules can be checked without a clock.

use serde_json::{Map, Value};

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Stamp a token response with the moment it was received, replacing any
/// `now` the response already carried.
pub fn stamp(mut fields: Map<String, Value>, now: i64) -> Map<String, Value> {
    fields.insert("now".to_string(), Value::from(now));
    fields
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// Seconds left until the token expires. Zero or negative once expired.
    pub remaining: i64,
}

impl Lifetime {
    pub fn new(issued: i64, expires_in: i64, now: i64) -> Self {
        Self {
            remaining: issued.saturating_add(expires_in).saturating_sub(now),
        }
    }

    pub fn expired(&self) -> bool {
        self.remaining <= 0
    }

    /// Split the remaining time into days, hours, minutes and seconds.
    pub fn parts(&self) -> (i64, i64, i64, i64) {
        let left = self.remaining.max(0);
        (
            left / 86_400,
            left % 86_400 / 3_600,
            left % 3_600 / 60,
            left % 60,
        )
    }
}
