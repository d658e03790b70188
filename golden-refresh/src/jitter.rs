//! Randomized offsets that keep refresh schedules from synchronizing.
//!
//! Repositories registered together share a due time. Adding an independent
//! signed offset each cycle spreads them apart so they stop arriving in the
//! same tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

pub const JITTER_PERCENTAGE: f64 = 0.1;

/// Largest offset, in milliseconds, for `interval` at `percentage`.
pub fn jitter_bound_ms(interval: Duration, percentage: f64) -> i64 {
    (interval.as_millis() as f64 * percentage).round() as i64
}

/// Uniform offset in `[-interval * 0.1, +interval * 0.1]`.
pub fn calculate_jitter(interval: Duration) -> chrono::Duration {
    calculate_jitter_with(interval, JITTER_PERCENTAGE, &mut rand::thread_rng())
}

pub fn calculate_jitter_with<R: Rng + ?Sized>(
    interval: Duration,
    percentage: f64,
    rng: &mut R,
) -> chrono::Duration {
    let bound = jitter_bound_ms(interval, percentage);
    if bound <= 0 {
        return chrono::Duration::zero();
    }
    chrono::Duration::milliseconds(rng.gen_range(-bound..=bound))
}

/// `now + interval + jitter`.
pub fn next_refresh_at<R: Rng + ?Sized>(
    now: DateTime<Utc>,
    interval: Duration,
    percentage: f64,
    rng: &mut R,
) -> DateTime<Utc> {
    let base = chrono::Duration::milliseconds(interval.as_millis() as i64);
    now + base + calculate_jitter_with(interval, percentage, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let jitter = calculate_jitter_with(HOUR, JITTER_PERCENTAGE, &mut rng);
            assert!(jitter.num_seconds().abs() <= 360, "{jitter}");
        }
    }

    #[test]
    fn jitter_takes_both_signs() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<_> = (0..200)
            .map(|_| calculate_jitter_with(HOUR, JITTER_PERCENTAGE, &mut rng))
            .collect();
        assert!(samples.iter().any(|j| *j < chrono::Duration::zero()));
        assert!(samples.iter().any(|j| *j > chrono::Duration::zero()));
    }

    #[test]
    fn zero_percentage_means_no_jitter() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            calculate_jitter_with(HOUR, 0.0, &mut rng),
            chrono::Duration::zero()
        );
    }

    #[test]
    fn thread_rng_entry_point_respects_bound() {
        for _ in 0..100 {
            assert!(calculate_jitter(HOUR).num_seconds().abs() <= 360);
        }
    }

    #[test]
    fn next_refresh_lands_in_window() {
        let mut rng = StdRng::seed_from_u64(42);
        let now = Utc::now();
        for _ in 0..100 {
            let next = next_refresh_at(now, HOUR, JITTER_PERCENTAGE, &mut rng);
            let delta = (next - now).num_seconds();
            assert!((3240..=3960).contains(&delta), "{delta}");
        }
    }
}
