//! Exponential backoff with jitter for retryable OCR failures (spec.md §9
//! open question: base 500ms, capped at 30s).

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

/// `min(cap, base * 2^attempt)`, jittered to within ±25% so a burst of
/// frames retrying together doesn't re-collide on the same tick.
pub fn delay_for_attempt(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(cap.as_millis());

    let jitter_fraction = rand::thread_rng().gen_range(0.75..=1.25);
    let jittered = (capped as f64 * jitter_fraction) as u64;
    Duration::from_millis(jittered.max(1))
}
