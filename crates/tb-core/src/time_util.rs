//! Wall-clock helpers.
//!
//! Order, swap and candle timestamps are all **milliseconds** since the Unix
//! epoch, so that is the unit used here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds in one hour.
pub const HOUR_MS: u64 = 3_600_000;

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Current time as **seconds** since Unix epoch.
#[inline]
pub fn now_secs() -> u64 {
    now_ms() / 1000
}

/// Milliseconds elapsed since `since_ms` (zero if `since_ms` is in the future).
#[inline]
pub fn elapsed_ms(since_ms: u64) -> u64 {
    now_ms().saturating_sub(since_ms)
}

/// Whole duration as milliseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
