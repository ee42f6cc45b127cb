//! Per-device capability validation state machine (§3 `DeviceCapabilityState`,
//! §4.B "Capability validation state machine").

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::prober::CapabilityProbe;

const VALIDATION_HISTORY_CAP: usize = 10;

/// Where the effective capability a client sees came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    Confirmed,
    Provisional,
}

/// A promoted, frequency-merged capability (§4.B step 2).
#[derive(Debug, Clone, Serialize)]
pub struct MergedCapability {
    pub formats: Vec<String>,
    pub resolutions: Vec<String>,
    pub frame_rates: Vec<String>,
    pub confirmed_at: DateTime<Utc>,
}

/// What a client/orchestrator sees when it asks for "the" capability of a device.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveCapability {
    pub formats: Vec<String>,
    pub resolutions: Vec<String>,
    pub frame_rates: Vec<String>,
    pub source: CapabilitySource,
}

/// Tunable thresholds for the validation state machine (§4.B), sourced from
/// [`crate::config::CameraConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ValidationThresholds {
    pub stability_threshold: u32,
    pub confirmation_threshold: u32,
}

/// Per-device validation state (§3 `DeviceCapabilityState`).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCapabilityState {
    provisional: Option<CapabilityProbe>,
    confirmed: Option<MergedCapability>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_probe_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    history: VecDeque<CapabilityProbe>,
    format_frequency: HashMap<String, u32>,
    resolution_frequency: HashMap<String, u32>,
    rate_frequency: HashMap<String, u32>,
}

impl Default for DeviceCapabilityState {
    fn default() -> Self {
        Self {
            provisional: None,
            confirmed: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_probe_time: None,
            history: VecDeque::new(),
            format_frequency: HashMap::new(),
            resolution_frequency: HashMap::new(),
            rate_frequency: HashMap::new(),
        }
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// `stable` overlapping `current` by at least the fraction of `current`'s own
/// members, per §4.B step 3. An empty current set trivially overlaps.
fn overlap_ratio(stable: &HashSet<String>, current: &HashSet<String>) -> f64 {
    if current.is_empty() {
        return 1.0;
    }
    stable.intersection(current).count() as f64 / current.len() as f64
}

fn merge_stable_then_recent(freq: &HashMap<String, u32>, latest: &[String], stability_threshold: u32) -> Vec<String> {
    let mut stable: Vec<String> = freq
        .iter()
        .filter(|(_, count)| **count >= stability_threshold)
        .map(|(k, _)| k.clone())
        .collect();
    stable.sort();
    let stable_set: HashSet<String> = stable.iter().cloned().collect();
    let mut recent: Vec<String> = latest.iter().filter(|item| !stable_set.contains(*item)).cloned().collect();
    recent.sort();
    recent.dedup();
    stable.extend(recent);
    stable
}

impl DeviceCapabilityState {
    pub fn effective_capability(&self) -> Option<EffectiveCapability> {
        if let Some(confirmed) = &self.confirmed {
            return Some(EffectiveCapability {
                formats: confirmed.formats.clone(),
                resolutions: confirmed.resolutions.clone(),
                frame_rates: confirmed.frame_rates.clone(),
                source: CapabilitySource::Confirmed,
            });
        }
        self.provisional.as_ref().map(|p| EffectiveCapability {
            formats: p.formats.iter().map(|f| f.code.clone()).collect(),
            resolutions: p.resolutions.clone(),
            frame_rates: p.frame_rates.clone(),
            source: CapabilitySource::Provisional,
        })
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn push_history(&mut self, probe: CapabilityProbe) {
        self.history.push_back(probe);
        while self.history.len() > VALIDATION_HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record a successful probe, running the full validation state machine
    /// of §4.B steps 1-5.
    pub fn record_success(&mut self, probe: CapabilityProbe, thresholds: ValidationThresholds, device_path: &str) {
        self.last_probe_time = Some(probe.probed_at);

        let current_formats: HashSet<String> = probe.formats.iter().map(|f| f.code.clone()).collect();
        let current_resolutions: HashSet<String> = probe.resolutions.iter().cloned().collect();
        let current_rates: HashSet<String> = probe.frame_rates.iter().cloned().collect();

        for code in &current_formats {
            *self.format_frequency.entry(code.clone()).or_insert(0) += 1;
        }
        for res in &current_resolutions {
            *self.resolution_frequency.entry(res.clone()).or_insert(0) += 1;
        }
        for rate in &current_rates {
            *self.rate_frequency.entry(rate.clone()).or_insert(0) += 1;
        }

        let merged_formats = merge_stable_then_recent(&self.format_frequency, &probe.formats.iter().map(|f| f.code.clone()).collect::<Vec<_>>(), thresholds.stability_threshold);
        let merged_resolutions = merge_stable_then_recent(&self.resolution_frequency, &probe.resolutions, thresholds.stability_threshold);
        let merged_rates = merge_stable_then_recent(&self.rate_frequency, &probe.frame_rates, thresholds.stability_threshold);

        let stable_formats: HashSet<String> = self
            .format_frequency
            .iter()
            .filter(|(_, c)| **c >= thresholds.stability_threshold)
            .map(|(k, _)| k.clone())
            .collect();
        let stable_resolutions: HashSet<String> = self
            .resolution_frequency
            .iter()
            .filter(|(_, c)| **c >= thresholds.stability_threshold)
            .map(|(k, _)| k.clone())
            .collect();
        let stable_rates: HashSet<String> = self
            .rate_frequency
            .iter()
            .filter(|(_, c)| **c >= thresholds.stability_threshold)
            .map(|(k, _)| k.clone())
            .collect();

        let consistent = overlap_ratio(&stable_formats, &current_formats) >= 0.7
            && overlap_ratio(&stable_resolutions, &current_resolutions) >= 0.7
            && overlap_ratio(&stable_rates, &current_rates) >= 0.7;

        let mut advance = consistent;
        if !consistent {
            let variance = 0.2 * (1.0 - jaccard(&stable_formats, &current_formats))
                + 0.4 * (1.0 - jaccard(&stable_resolutions, &current_resolutions))
                + 0.4 * (1.0 - jaccard(&stable_rates, &current_rates));
            if variance < 0.2 {
                advance = true;
            } else {
                self.consecutive_successes = 0;
                self.consecutive_failures = 0;
                self.confirmed = None;
            }
        }

        if advance {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            if self.consecutive_successes >= thresholds.confirmation_threshold {
                self.confirmed = Some(MergedCapability {
                    formats: merged_formats,
                    resolutions: merged_resolutions,
                    frame_rates: merged_rates,
                    confirmed_at: Utc::now(),
                });
            }
        }

        self.provisional = Some(probe.clone());
        self.push_history(probe);
        let _ = device_path;
    }

    /// Record a failed probe attempt (§4.B step 6).
    pub fn record_failure(&mut self, probe: CapabilityProbe, device_path: &str) {
        self.consecutive_failures += 1;
        self.last_probe_time = Some(probe.probed_at);
        if self.consecutive_failures >= 3 {
            warn!(device = device_path, failures = self.consecutive_failures, "persistent capability probe failure");
        }
        self.push_history(probe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::types::{PixelFormatInfo, ProbeDiagnostics};

    fn probe(formats: &[&str], resolutions: &[&str], rates: &[&str]) -> CapabilityProbe {
        CapabilityProbe {
            device_path: "/dev/video0".to_string(),
            detected: true,
            name: Some("Test Cam".to_string()),
            driver: Some("uvcvideo".to_string()),
            formats: formats
                .iter()
                .map(|c| PixelFormatInfo {
                    code: c.to_string(),
                    description: None,
                })
                .collect(),
            resolutions: resolutions.iter().map(|r| r.to_string()).collect(),
            frame_rates: rates.iter().map(|r| r.to_string()).collect(),
            probed_at: Utc::now(),
            diagnostics: ProbeDiagnostics {
                duration_ms: 10,
                stages: vec![],
                error_code: None,
                error_context: None,
                rates_are_fallback: false,
                probe_attempted_and_accessible: true,
            },
        }
    }

    #[test]
    fn confirms_after_threshold_consistent_successes() {
        let mut state = DeviceCapabilityState::default();
        let thresholds = ValidationThresholds {
            stability_threshold: 3,
            confirmation_threshold: 2,
        };

        for _ in 0..3 {
            state.record_success(
                probe(&["YUYV", "MJPG"], &["1920x1080", "1280x720"], &["30", "15"]),
                thresholds,
                "/dev/video0",
            );
        }

        assert!(state.is_confirmed());
        assert!(state.consecutive_successes() >= thresholds.confirmation_threshold);
        let effective = state.effective_capability().unwrap();
        assert_eq!(effective.source, CapabilitySource::Confirmed);
    }

    #[test]
    fn history_never_exceeds_ten_entries() {
        let mut state = DeviceCapabilityState::default();
        let thresholds = ValidationThresholds {
            stability_threshold: 3,
            confirmation_threshold: 2,
        };
        for _ in 0..25 {
            state.record_success(probe(&["YUYV"], &["1920x1080"], &["30"]), thresholds, "/dev/video0");
        }
        assert_eq!(state.history_len(), 10);
    }

    #[test]
    fn failure_increments_counter_without_clearing_confirmed() {
        let mut state = DeviceCapabilityState::default();
        let thresholds = ValidationThresholds {
            stability_threshold: 1,
            confirmation_threshold: 1,
        };
        state.record_success(probe(&["YUYV"], &["1920x1080"], &["30"]), thresholds, "/dev/video0");
        assert!(state.is_confirmed());

        state.record_failure(probe(&[], &[], &[]), "/dev/video0");
        assert_eq!(state.consecutive_failures(), 1);
        assert!(state.is_confirmed());
    }
}
