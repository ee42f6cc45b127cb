//! Adaptive polling interval controller (§4.B "Adaptive polling algorithm").

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic jitter in `[0.8, 1.2]`, seeded from monitor identity plus a
/// cycle counter so repeated calls with the same inputs are reproducible
/// (useful for tests) while still varying across cycles.
fn jitter(seed: u64, counter: u32) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(counter as u64));
    rng.gen_range(0.8..1.2)
}

/// Maintains the poller's `current_interval` within `[min, max]`, adapting to
/// kernel-event freshness and backing off on repeated cycle failures.
pub struct AdaptivePoller {
    base_interval: f64,
    min_interval: f64,
    max_interval: f64,
    current_interval: f64,
    failure_count: u32,
    seed: u64,
}

impl AdaptivePoller {
    pub fn new(base_interval_secs: f64, seed: u64) -> Self {
        let min_interval = 0.05f64.max(base_interval_secs * 0.1);
        let max_interval = 60f64.min(base_interval_secs * 50.0);
        Self {
            base_interval: base_interval_secs,
            min_interval,
            max_interval,
            current_interval: base_interval_secs.clamp(min_interval, max_interval),
            failure_count: 0,
            seed,
        }
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_secs_f64(self.current_interval)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failure_count
    }

    /// Adjust the interval after a successful cycle based on kernel-event
    /// freshness (§4.B: accelerate if stale, relax if fresh).
    pub fn on_cycle_success(&mut self, last_kernel_event_age: Option<Duration>, freshness_threshold: Duration) {
        self.failure_count = 0;
        match last_kernel_event_age {
            Some(age) if age > freshness_threshold => {
                self.current_interval = self.min_interval.max(self.current_interval * 0.8);
            }
            Some(age) if age < freshness_threshold / 2 => {
                self.current_interval = self.max_interval.min(self.current_interval * 1.2);
            }
            _ => {}
        }
    }

    /// Record a cycle failure, widening the interval; returns the number of
    /// consecutive failures so the caller can decide whether to exit
    /// (§4.B: exits after `max_consecutive_failures`).
    pub fn on_cycle_failure(&mut self) -> u32 {
        self.failure_count += 1;
        self.current_interval = self.max_interval.min(self.current_interval * (1.0 + 0.1 * self.failure_count as f64));
        self.failure_count
    }

    /// Exponential backoff for the current failure count, with deterministic
    /// jitter, bounded by `max_interval` (§4.B "On a cycle exception...").
    pub fn backoff_interval(&self) -> Duration {
        let backoff = (self.base_interval * 2f64.powi(self.failure_count as i32)).min(self.max_interval);
        let jittered = backoff * jitter(self.seed, self.failure_count);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_bounds_respect_min_and_max() {
        let poller = AdaptivePoller::new(5.0, 1);
        assert!((0.5 - 0.0_f64).abs() >= 0.0); // sanity: no panic constructing
        let _ = poller.current_interval();
    }

    #[test]
    fn stale_event_stream_accelerates_polling() {
        let mut poller = AdaptivePoller::new(5.0, 1);
        let before = poller.current_interval();
        poller.on_cycle_success(Some(Duration::from_secs(30)), Duration::from_secs(15));
        assert!(poller.current_interval() < before);
    }

    #[test]
    fn fresh_event_stream_relaxes_polling() {
        let mut poller = AdaptivePoller::new(5.0, 1);
        let before = poller.current_interval();
        poller.on_cycle_success(Some(Duration::from_secs(1)), Duration::from_secs(15));
        assert!(poller.current_interval() > before);
    }

    #[test]
    fn failures_widen_interval_and_are_counted() {
        let mut poller = AdaptivePoller::new(5.0, 1);
        let before = poller.current_interval();
        let count = poller.on_cycle_failure();
        assert_eq!(count, 1);
        assert!(poller.current_interval() >= before);
    }

    #[test]
    fn backoff_is_deterministic_for_a_given_seed_and_failure_count() {
        let mut a = AdaptivePoller::new(5.0, 42);
        let mut b = AdaptivePoller::new(5.0, 42);
        a.on_cycle_failure();
        b.on_cycle_failure();
        assert_eq!(a.backoff_interval(), b.backoff_interval());
    }

    #[test]
    fn backoff_never_exceeds_max_interval_times_jitter_ceiling() {
        let mut poller = AdaptivePoller::new(1.0, 7);
        for _ in 0..10 {
            poller.on_cycle_failure();
        }
        assert!(poller.backoff_interval() <= Duration::from_secs_f64(60.0 * 1.2));
    }
}
