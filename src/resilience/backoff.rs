//! Exponential backoff with optional jitter and cap.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt `attempt` (1-indexed).
///
/// `base_ms * multiplier^(attempt - 1)`, capped at `max_ms` when non-zero,
/// plus up to `jitter_ratio` of the delay at random.
pub fn calculate_backoff(
    attempt: u32,
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
    jitter_ratio: f64,
) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let raw = base_ms as f64 * multiplier.powi(exponent);
    let mut delay_ms = if raw.is_finite() && raw < u64::MAX as f64 {
        raw.round() as u64
    } else {
        u64::MAX
    };
    if max_ms > 0 {
        delay_ms = delay_ms.min(max_ms);
    }

    let jitter_range = (delay_ms as f64 * jitter_ratio) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(1, 100, 2.0, 0, 0.0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, 100, 2.0, 0, 0.0), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2.0, 0, 0.0), Duration::from_millis(400));
        assert_eq!(calculate_backoff(3, 100, 1.5, 0, 0.0), Duration::from_millis(225));
    }

    #[test]
    fn test_backoff_cap_and_overflow() {
        assert_eq!(calculate_backoff(10, 100, 2.0, 1000, 0.0), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(5000, 100, 10.0, 0, 0.0), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..50 {
            let d = calculate_backoff(2, 100, 2.0, 0, 0.1);
            assert!(d >= Duration::from_millis(200));
            assert!(d < Duration::from_millis(220));
        }
    }
}
