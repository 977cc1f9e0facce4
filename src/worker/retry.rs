//! Exponential backoff with full jitter.

use rand::Rng;
use std::time::Duration;

/// First-retry ceiling.
pub const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Backoff never exceeds this regardless of attempt count.
pub const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Delay before retry number `attempt` (1-based): uniform over
/// `[0, min(cap, base * 2^(attempt-1))]`.
pub fn backoff_delay<R: Rng>(attempt: u32, rng: &mut R) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ceiling = BACKOFF_BASE
        .saturating_mul(1_u32 << exp)
        .min(BACKOFF_CAP);
    #[allow(clippy::cast_possible_truncation)]
    let micros = ceiling.as_micros().min(u128::from(u64::MAX)) as u64;
    Duration::from_micros(rng.gen_range(0..=micros))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_backoff_is_bounded_by_ceiling() {
        let mut rng = SmallRng::seed_from_u64(7);
        for attempt in 1..=3_u32 {
            let ceiling = BACKOFF_BASE * 2_u32.pow(attempt - 1);
            for _ in 0..100 {
                assert!(backoff_delay(attempt, &mut rng) <= ceiling);
            }
        }
    }

    #[test]
    fn test_backoff_caps_at_two_seconds() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(backoff_delay(30, &mut rng) <= BACKOFF_CAP);
        }
    }

    #[test]
    fn test_jitter_spreads_delays() {
        let mut rng = SmallRng::seed_from_u64(42);
        let delays: Vec<Duration> = (0..50).map(|_| backoff_delay(5, &mut rng)).collect();
        let distinct: std::collections::BTreeSet<_> = delays.iter().collect();
        assert!(distinct.len() > 10);
    }
}
