//! Clock & ID source (C1): wall time, monotonic time, job IDs, and delay
//! sampling, all behind a trait so tests can inject a deterministic fake.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Capabilities the engine requires from a clock: wall time for comparisons
/// that must survive process restarts and serialize cleanly, monotonic time
/// for measuring elapsed durations, ID generation, and delay sampling.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Instant;
    fn new_job_id(&self) -> JobId;

    /// Uniformly samples a duration in `[min, max]`. `min == max` is legal
    /// and returns that fixed duration (used by tests).
    fn sample_delay(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let min_nanos = min.as_nanos() as u64;
        let max_nanos = max.as_nanos() as u64;
        let sampled = rand::thread_rng().gen_range(min_nanos..=max_nanos);
        Duration::from_nanos(sampled)
    }

    /// Full-jitter exponential backoff: `uniform(0, min(max, base * 2^(n-1)))`.
    fn backoff(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = base.as_secs_f64() * 2f64.powi(exponent as i32);
        let cap = scaled.min(max.as_secs_f64()).max(0.0);
        if cap <= 0.0 {
            return Duration::ZERO;
        }
        let sampled = rand::thread_rng().gen_range(0.0..=cap);
        Duration::from_secs_f64(sampled)
    }
}

/// Opaque, globally-unique (within the process) job identifier.
pub type JobId = Uuid;

/// Production clock backed by the system wall clock and `tokio`'s monotonic
/// instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    fn new_job_id(&self) -> JobId {
        Uuid::now_v7()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_delay_respects_fixed_bounds() {
        let clock = SystemClock;
        let d = clock.sample_delay(Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(d, Duration::from_millis(100));
    }

    #[test]
    fn sample_delay_stays_within_range() {
        let clock = SystemClock;
        for _ in 0..50 {
            let d = clock.sample_delay(Duration::from_millis(10), Duration::from_millis(20));
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn backoff_is_capped_by_max() {
        let clock = SystemClock;
        for attempt in 1..10 {
            let d = clock.backoff(attempt, Duration::from_secs(1), Duration::from_secs(30));
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn backoff_grows_with_attempt_ceiling() {
        let clock = SystemClock;
        // attempt 1 ceiling = base = 1s; attempt 6 ceiling = min(30s, 32s) = 30s
        let d1 = clock.backoff(1, Duration::from_secs(1), Duration::from_secs(30));
        assert!(d1 <= Duration::from_secs(1));
        let d6 = clock.backoff(6, Duration::from_secs(1), Duration::from_secs(30));
        assert!(d6 <= Duration::from_secs(30));
    }

    #[test]
    fn new_job_id_is_unique() {
        let clock = SystemClock;
        let a = clock.new_job_id();
        let b = clock.new_job_id();
        assert_ne!(a, b);
    }
}
