//! Bounded exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based):
/// `min(base × 2^(attempt−1), max)`, plus up to 10% jitter when enabled.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let extra = if jitter && capped >= 10 {
        rand::thread_rng().gen_range(0..capped / 10)
    } else {
        0
    };

    Duration::from_millis(capped + extra)
}
