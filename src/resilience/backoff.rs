//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `retry` (0-based): `min(base * 2^retry, max)`
/// plus up to `jitter_ratio` of that value at random.
pub fn calculate_backoff(retry: u32, base: Duration, max: Duration, jitter_ratio: f64) -> Duration {
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let factor = 2u64.saturating_pow(retry);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = (capped as f64 * jitter_ratio.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter))
}
