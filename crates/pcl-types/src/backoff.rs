use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based): `base * factor^(attempt-1)`
/// plus up to 10% jitter, never exceeding `max`. Attempt 0 waits nothing.
pub fn jittered_backoff(attempt: u32, base: Duration, factor: f64, max: Duration) -> Duration {
    if attempt == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let scaled = base.as_secs_f64() * factor.max(1.0).powi(exponent);
    let capped = scaled.min(max.as_secs_f64());

    let jitter_range = capped / 10.0;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(0.0..jitter_range)
    } else {
        0.0
    };

    Duration::try_from_secs_f64((capped + jitter).min(max.as_secs_f64())).unwrap_or(max)
}
