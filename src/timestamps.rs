//! Epoch value normalization and rendering.
//!
//! The device stores epoch milliseconds, but older firmware and some import
//! paths left seconds or microseconds behind. Every raw value is normalized to
//! milliseconds once, at load time, so the rest of the crate never guesses.

use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 2200-01-01 in seconds; anything larger cannot be a seconds value.
const SECONDS_CEILING: i64 = 7_258_118_400;
/// 2100-01-01 in milliseconds.
const MILLIS_CEILING: i64 = 4_102_444_800_000;
/// 2100-01-01 in microseconds.
const MICROS_CEILING: i64 = 4_102_444_800_000_000;

/// Accepted range, 1900-01-01 through 2100-01-01, in seconds.
const MIN_SECONDS: i64 = -2_208_988_800;
const MAX_SECONDS: i64 = 4_102_444_800;

/// Normalize a raw epoch value of unknown unit to milliseconds.
///
/// Zero and values that fall outside 1900..=2100 after unit detection are
/// treated as absent.
pub fn normalize_epoch(raw: i64) -> Option<i64> {
    if raw == 0 {
        return None;
    }
    let millis = if raw > SECONDS_CEILING {
        if raw < MILLIS_CEILING {
            raw
        } else if raw < MICROS_CEILING {
            raw / 1_000
        } else {
            return None;
        }
    } else {
        raw.checked_mul(1_000)?
    };
    let secs = millis.div_euclid(1_000);
    if (MIN_SECONDS..=MAX_SECONDS).contains(&secs) {
        Some(millis)
    } else {
        None
    }
}

pub fn to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

pub fn to_system_time(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}
