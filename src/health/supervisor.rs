//! Circuit-breaker health supervisor (§4.D).
//!
//! Grounded in `controller.py`'s `_health_monitor_loop` but restructured
//! around an explicit state machine, since the anti-flapping property (§8
//! "a single successful probe during RECOVERING must not set status to
//! HEALTHY") is exactly the kind of invariant that's easy to lose in an
//! ad-hoc counter-based loop and easy to keep in a typed one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::MediaMtxConfig;
use crate::error::Result;

/// Publicly observable status (§3 `HealthState`). `Degraded` is a reporting
/// view, not a distinct transition target: it's `Healthy` with
/// `consecutive_failures` in `[1, failure_threshold)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    CircuitOpen,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawState {
    Healthy,
    CircuitOpen,
    Recovering,
}

/// A point-in-time, lock-free-readable view of supervisor state (§5: "other
/// components read snapshots through an accessor").
#[derive(Debug, Clone, Serialize)]
pub struct HealthSupervisorSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes_during_recovery: u32,
    pub circuit_breaker_activations: u64,
    pub recovery_count: u64,
}

struct MutableState {
    raw: RawState,
    consecutive_failures: u32,
    consecutive_successes_during_recovery: u32,
    circuit_opened_at: Option<Instant>,
}

/// Any component the supervisor can probe for liveness. `MediaMtxClient`
/// implements this via [`crate::mediamtx::client::MediaMtxClient::health_check`].
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

pub struct HealthSupervisor {
    failure_threshold: u32,
    circuit_breaker_timeout: Duration,
    recovery_confirmation_threshold: u32,
    backoff_base_multiplier: f64,
    max_backoff: Duration,
    jitter_range: f64,
    check_interval: Duration,

    state: Mutex<MutableState>,
    snapshot: ArcSwap<HealthSupervisorSnapshot>,
    circuit_breaker_activations: AtomicU64,
    recovery_count: AtomicU64,
    rng_seed: AtomicU32,
}

impl HealthSupervisor {
    pub fn new(config: &MediaMtxConfig) -> Self {
        let snapshot = HealthSupervisorSnapshot {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes_during_recovery: 0,
            circuit_breaker_activations: 0,
            recovery_count: 0,
        };
        Self {
            failure_threshold: config.health_failure_threshold,
            circuit_breaker_timeout: Duration::from_secs(config.health_circuit_breaker_timeout_secs),
            recovery_confirmation_threshold: config.health_recovery_confirmation_threshold,
            backoff_base_multiplier: config.health_backoff_base_multiplier,
            max_backoff: Duration::from_secs(config.health_max_backoff_secs),
            jitter_range: config.health_jitter_range,
            check_interval: Duration::from_secs(config.health_check_interval_secs),
            state: Mutex::new(MutableState {
                raw: RawState::Healthy,
                consecutive_failures: 0,
                consecutive_successes_during_recovery: 0,
                circuit_opened_at: None,
            }),
            snapshot: ArcSwap::from_pointee(snapshot),
            circuit_breaker_activations: AtomicU64::new(0),
            recovery_count: AtomicU64::new(0),
            rng_seed: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<HealthSupervisorSnapshot> {
        self.snapshot.load_full()
    }

    fn jitter(&self) -> f64 {
        use rand::SeedableRng;
        let seed = self.rng_seed.fetch_add(1, Ordering::Relaxed);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
        1.0 + rng.gen_range(-self.jitter_range..=self.jitter_range)
    }

    fn publish(&self, state: &MutableState) {
        let status = match state.raw {
            RawState::Healthy if state.consecutive_failures == 0 => HealthStatus::Healthy,
            RawState::Healthy => HealthStatus::Degraded,
            RawState::CircuitOpen => HealthStatus::CircuitOpen,
            RawState::Recovering => HealthStatus::Recovering,
        };
        self.snapshot.store(Arc::new(HealthSupervisorSnapshot {
            status,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes_during_recovery: state.consecutive_successes_during_recovery,
            circuit_breaker_activations: self.circuit_breaker_activations.load(Ordering::SeqCst),
            recovery_count: self.recovery_count.load(Ordering::SeqCst),
        }));
    }

    /// Apply one probe outcome to the state machine (§4.D transitions).
    /// Exposed directly so tests can drive the sequence in §8 scenario 3
    /// without sleeping through real intervals.
    pub async fn record_outcome(&self, success: bool) {
        let mut state = self.state.lock().await;
        match state.raw {
            RawState::Healthy => {
                if success {
                    state.consecutive_failures = 0;
                } else {
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.failure_threshold {
                        state.raw = RawState::CircuitOpen;
                        state.circuit_opened_at = Some(Instant::now());
                        self.circuit_breaker_activations.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            consecutive_failures = state.consecutive_failures,
                            "health supervisor: circuit opened"
                        );
                    }
                }
            }
            RawState::CircuitOpen => {
                let elapsed = state.circuit_opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.circuit_breaker_timeout {
                    state.raw = RawState::Recovering;
                    state.consecutive_successes_during_recovery = 0;
                    info!("health supervisor: entering recovery");
                }
                // Probes taken while still open do not advance failure counting
                // further; only the timeout advances the state.
            }
            RawState::Recovering => {
                if success {
                    state.consecutive_successes_during_recovery += 1;
                    if state.consecutive_successes_during_recovery >= self.recovery_confirmation_threshold {
                        state.raw = RawState::Healthy;
                        state.consecutive_failures = 0;
                        state.consecutive_successes_during_recovery = 0;
                        state.circuit_opened_at = None;
                        self.recovery_count.fetch_add(1, Ordering::SeqCst);
                        info!("health supervisor: recovered to healthy");
                    }
                } else {
                    // Anti-flapping: a failure during recovery resets the success
                    // counter but does NOT reopen the circuit (§3, §4.D).
                    state.consecutive_successes_during_recovery = 0;
                    warn!("health supervisor: failure during recovery, resetting success streak");
                }
            }
        }
        self.publish(&state);
    }

    fn next_interval(&self, consecutive_failures: u32, circuit_open: bool) -> Duration {
        if circuit_open {
            let backoff = self.backoff_base_multiplier.powi(consecutive_failures as i32);
            let seconds = (self.check_interval.as_secs_f64() * backoff).min(self.max_backoff.as_secs_f64());
            Duration::from_secs_f64((seconds * self.jitter()).max(0.0))
        } else {
            Duration::from_secs_f64(self.check_interval.as_secs_f64() * self.jitter())
        }
    }

    /// Background supervisor loop (§4.D, §5). Runs until cancelled.
    pub async fn run(&self, probe: Arc<dyn HealthProbe>) {
        loop {
            let result = probe.probe().await;
            self.record_outcome(result.is_ok()).await;
            if let Err(err) = &result {
                warn!(error = %err, "health probe failed");
            }

            let (failures, circuit_open) = {
                let state = self.state.lock().await;
                (state.consecutive_failures, matches!(state.raw, RawState::CircuitOpen))
            };
            tokio::time::sleep(self.next_interval(failures, circuit_open)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MediaMtxConfig {
        MediaMtxConfig {
            health_check_interval_secs: 5,
            health_failure_threshold: 3,
            health_circuit_breaker_timeout_secs: 60,
            health_recovery_confirmation_threshold: 3,
            health_backoff_base_multiplier: 2.0,
            health_max_backoff_secs: 60,
            health_jitter_range: 0.0,
            ..MediaMtxConfig::default()
        }
    }

    #[tokio::test]
    async fn three_failures_open_the_circuit() {
        let supervisor = HealthSupervisor::new(&config());
        for _ in 0..3 {
            supervisor.record_outcome(false).await;
        }
        assert_eq!(supervisor.snapshot().status, HealthStatus::CircuitOpen);
        assert_eq!(supervisor.snapshot().circuit_breaker_activations, 1);
    }

    #[tokio::test]
    async fn single_success_during_recovery_does_not_close_circuit() {
        let supervisor = HealthSupervisor::new(&config());
        for _ in 0..3 {
            supervisor.record_outcome(false).await;
        }
        {
            let mut state = supervisor.state.lock().await;
            state.raw = RawState::Recovering;
        }
        supervisor.record_outcome(true).await;
        assert_eq!(supervisor.snapshot().status, HealthStatus::Recovering);
    }

    #[tokio::test]
    async fn failure_during_recovery_resets_successes_without_reopening() {
        let supervisor = HealthSupervisor::new(&config());
        for _ in 0..3 {
            supervisor.record_outcome(false).await;
        }
        {
            let mut state = supervisor.state.lock().await;
            state.raw = RawState::Recovering;
        }
        supervisor.record_outcome(true).await;
        supervisor.record_outcome(true).await;
        supervisor.record_outcome(false).await;
        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.status, HealthStatus::Recovering);
        assert_eq!(snapshot.consecutive_successes_during_recovery, 0);
    }

    #[tokio::test]
    async fn flapping_sequence_activates_once_and_recovers_once() {
        // §8 scenario 3: 3 failures -> 1 success -> 1 failure -> 1 success ->
        // 1 failure -> 3 successes.
        let supervisor = HealthSupervisor::new(&config());
        for _ in 0..3 {
            supervisor.record_outcome(false).await;
        }
        assert_eq!(supervisor.snapshot().status, HealthStatus::CircuitOpen);

        {
            let mut state = supervisor.state.lock().await;
            state.raw = RawState::Recovering;
        }

        supervisor.record_outcome(true).await;
        supervisor.record_outcome(false).await;
        supervisor.record_outcome(true).await;
        supervisor.record_outcome(false).await;
        supervisor.record_outcome(true).await;
        supervisor.record_outcome(true).await;
        supervisor.record_outcome(true).await;

        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.circuit_breaker_activations, 1);
        assert_eq!(snapshot.recovery_count, 1);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn circuit_transitions_to_recovering_after_timeout_elapses() {
        let mut cfg = config();
        cfg.health_circuit_breaker_timeout_secs = 0;
        let supervisor = HealthSupervisor::new(&cfg);
        for _ in 0..3 {
            supervisor.record_outcome(false).await;
        }
        // Next probe outcome (regardless of success) observes the elapsed timeout.
        supervisor.record_outcome(true).await;
        assert_eq!(supervisor.snapshot().status, HealthStatus::Recovering);
    }
}
