//! Wall-clock helpers.
//!
//! Every mutating operation in the crate takes an explicit `now_ms` so the
//! algorithms stay deterministic under test; this module is the production
//! source of that value.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
