// src/engine/batm.rs

//! Budget-Adaptive Time Model: the expected time allowance for the next
//! item, derived from remaining budget, remaining item count and band.

use super::config::TimeWeights;

/// Expected milliseconds for the next item. The base allowance spreads the
/// remaining budget evenly over the remaining items, then the band weight
/// scales it. Negative inputs clamp rather than error.
pub fn expected_ms(
    remaining_time_sec: i64,
    remaining_item_count: i64,
    band: i32,
    weights: &TimeWeights,
) -> i64 {
    let base_per_item_ms =
        remaining_time_sec.max(0) as f64 * 1000.0 / remaining_item_count.max(1) as f64;
    (base_per_item_ms * weights.for_band(band)).round() as i64
}

/// Actual time over expected time; < 1.0 means faster than expected.
pub fn pace_ratio(actual_ms: i64, expected_ms: i64) -> f64 {
    actual_ms.max(0) as f64 / expected_ms.max(1) as f64
}
