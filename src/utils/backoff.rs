use std::time::Duration;

use rand::Rng;

/// `min(base * 2^(attempt-1), max)`; zero attempts means no delay.
pub fn capped_exponential(
    base: Duration,
    max: Duration,
    attempt: u32,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Uniform random delay in `[0, max]`
pub fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
