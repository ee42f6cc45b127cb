//! Hybrid discovery monitor (§4.B): kernel events plus adaptive polling,
//! capability validation, and device-change notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::discovery::capability::{DeviceCapabilityState, EffectiveCapability, ValidationThresholds};
use crate::discovery::device::{Device, DeviceEvent, DeviceEventKind, DeviceStatus};
use crate::discovery::kernel_events::{KernelEvent, KernelEventAction, KernelEventSource};
use crate::discovery::poller::AdaptivePoller;
use crate::prober::DeviceProber;
use crate::utils::LogThrottler;

/// Distinguishes "never probed" from "probed and failed" for the
/// orchestrator's metadata derivation (§4.I, §9 open question).
#[derive(Debug, Clone)]
pub enum CapabilityStatus {
    Available(EffectiveCapability),
    Error,
    Unknown,
}

fn short_hex_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Shared, mutex-guarded discovery state (§5: "known_devices and
/// capability_states are mutated only while holding the Discovery Monitor's
/// single asynchronous mutex").
struct DiscoveryState {
    known_devices: HashMap<String, Device>,
    capability_states: HashMap<String, DeviceCapabilityState>,
}

pub struct HybridDiscoveryMonitor {
    config: CameraConfig,
    prober: DeviceProber,
    state: Arc<Mutex<DiscoveryState>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    events_filtered: AtomicU64,
}

impl HybridDiscoveryMonitor {
    pub fn new(config: CameraConfig) -> Self {
        let prober = DeviceProber::new(Duration::from_secs_f64(config.detection_timeout_secs));
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            prober,
            state: Arc::new(Mutex::new(DiscoveryState {
                known_devices: HashMap::new(),
                capability_states: HashMap::new(),
            })),
            event_tx,
            events_filtered: AtomicU64::new(0),
        }
    }

    /// Overrides the introspection binary the prober shells out to
    /// (default `v4l2-ctl`), e.g. to point at a test double.
    pub fn with_prober_tool(mut self, tool: impl Into<String>) -> Self {
        self.prober = self.prober.with_tool(tool);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    pub fn events_filtered(&self) -> u64 {
        self.events_filtered.load(Ordering::Relaxed)
    }

    /// Snapshot of all currently known devices (§3 "clients receive
    /// snapshots (immutable copies) via the Orchestrator").
    pub async fn snapshot_devices(&self) -> Vec<Device> {
        self.state.lock().await.known_devices.values().cloned().collect()
    }

    pub async fn device(&self, path: &str) -> Option<Device> {
        self.state.lock().await.known_devices.get(path).cloned()
    }

    /// §4.I "Enhanced metadata derivation" accessor: the effective
    /// capability, distinguishing confirmed/provisional/error/absent so the
    /// orchestrator can set `metadata_source`/`metadata_validation`
    /// correctly instead of conflating "no probe yet" with "probe failed"
    /// (§9 open question).
    pub async fn capability_status(&self, path: &str) -> CapabilityStatus {
        let guard = self.state.lock().await;
        let Some(state) = guard.capability_states.get(path) else {
            return CapabilityStatus::Unknown;
        };
        if let Some(capability) = state.effective_capability() {
            return CapabilityStatus::Available(capability);
        }
        if state.consecutive_failures() > 0 {
            return CapabilityStatus::Error;
        }
        CapabilityStatus::Unknown
    }

    fn device_path(&self, index: u32) -> String {
        format!("{}{}", self.config.device_prefix, index)
    }

    fn index_from_path(&self, path: &str) -> Option<u32> {
        path.strip_prefix(&self.config.device_prefix)?.parse().ok()
    }

    fn in_monitored_range(&self, index: u32) -> bool {
        index >= self.config.device_range.0 && index <= self.config.device_range.1
    }

    fn thresholds(&self) -> ValidationThresholds {
        ValidationThresholds {
            stability_threshold: self.config.stability_threshold,
            confirmation_threshold: self.config.confirmation_threshold,
        }
    }

    fn emit(&self, kind: DeviceEventKind, device: Device) {
        let event = DeviceEvent {
            kind,
            device,
            correlation_id: short_hex_id(),
        };
        // A lagging/absent subscriber must never block discovery.
        let _ = self.event_tx.send(event);
    }

    /// Apply a single kernel event, filtering by device prefix and monitored
    /// index range (§4.B: out-of-range events are counted, not acted on).
    async fn handle_kernel_event(&self, event: KernelEvent) {
        let Some(index) = self.index_from_path(&event.device_node) else {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !self.in_monitored_range(index) {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match event.action {
            KernelEventAction::Add | KernelEventAction::Change => {
                self.probe_and_reconcile(index).await;
            }
            KernelEventAction::Remove => {
                self.reconcile_removed(index).await;
            }
        }
    }

    async fn probe_and_reconcile(&self, index: u32) {
        let path = self.device_path(index);
        let probe = self.prober.probe(&path).await;
        let thresholds = self.thresholds();

        let mut guard = self.state.lock().await;
        let entry = guard.capability_states.entry(path.clone()).or_default();
        if probe.detected {
            entry.record_success(probe.clone(), thresholds, &path);
        } else {
            entry.record_failure(probe.clone(), &path);
        }

        let previously_known = guard.known_devices.get(&path).cloned();
        let device = Device {
            path: path.clone(),
            index,
            name: probe.name.clone().unwrap_or_else(|| path.clone()),
            status: DeviceStatus::Connected,
        };
        guard.known_devices.insert(path.clone(), device.clone());
        drop(guard);

        match previously_known {
            None => {
                info!(device = %path, "camera connected");
                self.emit(DeviceEventKind::Connected, device);
            }
            Some(previous) if previous.status != DeviceStatus::Connected || previous.name != device.name => {
                debug!(device = %path, "camera status changed");
                self.emit(DeviceEventKind::StatusChanged, device);
            }
            Some(_) => {}
        }
    }

    async fn reconcile_removed(&self, index: u32) {
        let path = self.device_path(index);
        let mut guard = self.state.lock().await;
        let removed = guard.known_devices.remove(&path);
        guard.capability_states.remove(&path);
        drop(guard);

        if let Some(mut device) = removed {
            device.status = DeviceStatus::Disconnected;
            info!(device = %path, "camera disconnected");
            self.emit(DeviceEventKind::Disconnected, device);
        }
    }

    /// One full enumeration cycle across the monitored index range. Used both
    /// by the periodic poller and to seed state at startup.
    async fn poll_cycle(&self) -> Result<(), ()> {
        for index in self.config.device_range.0..=self.config.device_range.1 {
            let path = self.device_path(index);
            let exists = tokio::fs::metadata(&path).await.is_ok();
            let was_known = {
                let guard = self.state.lock().await;
                guard.known_devices.contains_key(&path)
            };

            if exists {
                self.probe_and_reconcile(index).await;
            } else if was_known {
                self.reconcile_removed(index).await;
            }
        }
        Ok(())
    }

    /// Drives the monitor until `max_consecutive_failures` cycle exceptions
    /// occur (§4.B), composing the kernel-event stream with the adaptive
    /// poller. Returns once the monitor gives up; the orchestrator treats
    /// that as a fatal component failure.
    pub async fn run(&self, mut kernel_source: Box<dyn KernelEventSource>) {
        let identity_seed = {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in self.config.device_prefix.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            hash
        };
        let mut poller = AdaptivePoller::new(self.config.poll_interval_secs, identity_seed);
        let mut last_kernel_event: Option<Instant> = None;
        let mut next_poll_due = Instant::now();
        let failure_log_throttle = LogThrottler::with_secs(30);

        loop {
            let now = Instant::now();
            let until_poll = next_poll_due.saturating_duration_since(now);
            let wait = until_poll.min(Duration::from_secs(1));

            tokio::select! {
                event = kernel_source.next_event(wait) => {
                    if let Some(event) = event {
                        last_kernel_event = Some(Instant::now());
                        self.handle_kernel_event(event).await;
                    }
                }
            }

            if Instant::now() < next_poll_due {
                continue;
            }

            let freshness_threshold = Duration::from_secs_f64(self.config.freshness_threshold_secs);
            match self.poll_cycle().await {
                Ok(()) => {
                    let age = last_kernel_event.map(|t| t.elapsed());
                    poller.on_cycle_success(age, freshness_threshold);
                    next_poll_due = Instant::now() + poller.current_interval();
                }
                Err(()) => {
                    let failures = poller.on_cycle_failure();
                    if failures >= self.config.max_consecutive_failures {
                        error!(failures, "discovery monitor exiting after repeated cycle failures");
                        return;
                    }
                    let backoff = poller.backoff_interval();
                    if failure_log_throttle.should_log("cycle_failure") {
                        warn!(failures, backoff_secs = backoff.as_secs_f64(), "discovery cycle failed, backing off");
                    }
                    tokio::time::sleep(backoff).await;
                    next_poll_due = Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::kernel_events::NoneEventSource;

    fn test_config() -> CameraConfig {
        CameraConfig {
            device_range: (0, 1),
            poll_interval_secs: 1.0,
            detection_timeout_secs: 1.0,
            enable_capability_detection: true,
            device_prefix: "/dev/video".to_string(),
            freshness_threshold_secs: 15.0,
            max_consecutive_failures: 5,
            stability_threshold: 3,
            confirmation_threshold: 2,
        }
    }

    #[tokio::test]
    async fn out_of_range_kernel_events_are_filtered_not_acted_on() {
        let monitor = HybridDiscoveryMonitor::new(test_config());
        monitor
            .handle_kernel_event(KernelEvent {
                device_node: "/dev/video99".to_string(),
                action: KernelEventAction::Add,
            })
            .await;
        assert_eq!(monitor.events_filtered(), 1);
    }

    #[tokio::test]
    async fn removing_an_unknown_device_is_a_no_op_not_a_panic() {
        let monitor = HybridDiscoveryMonitor::new(test_config());
        monitor.reconcile_removed(0).await;
        assert_eq!(monitor.events_filtered(), 0);
    }

    #[tokio::test]
    async fn subscribers_can_be_attached_before_any_events() {
        let monitor = HybridDiscoveryMonitor::new(test_config());
        let _receiver = monitor.subscribe();
        let _: Box<dyn KernelEventSource> = Box::new(NoneEventSource);
    }
}
