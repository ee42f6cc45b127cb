//! Types produced by the device capability prober (§4.A, §3 `CapabilityProbe`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single detected pixel format: its fourcc-style code and optional description.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelFormatInfo {
    pub code: String,
    pub description: Option<String>,
}

/// Why a probe failed to produce usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorCode {
    Timeout,
    ProcessError,
    ParseError,
}

/// One stage of the layered parsing pipeline and whether it found anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeStageOutcome {
    pub stage: String,
    pub matched: bool,
}

/// Structured diagnostics attached to every probe, successful or not.
///
/// `probe_attempted_and_accessible` resolves the spec's open question about
/// conflating "no probe yet" with "probe attempted and failed": it is `true`
/// only when the introspection tool actually ran and exited, regardless of
/// whether useful data was parsed out of its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeDiagnostics {
    pub duration_ms: u64,
    pub stages: Vec<ProbeStageOutcome>,
    pub error_code: Option<ProbeErrorCode>,
    pub error_context: Option<String>,
    pub rates_are_fallback: bool,
    pub probe_attempted_and_accessible: bool,
}

impl ProbeDiagnostics {
    pub fn failed(duration_ms: u64, error_code: ProbeErrorCode, context: impl Into<String>) -> Self {
        Self {
            duration_ms,
            stages: Vec::new(),
            error_code: Some(error_code),
            error_context: Some(context.into()),
            rates_are_fallback: false,
            probe_attempted_and_accessible: !matches!(error_code, ProbeErrorCode::Timeout),
        }
    }
}

/// A single capability probe result (§3 `CapabilityProbe`). Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProbe {
    pub device_path: String,
    pub detected: bool,
    pub name: Option<String>,
    pub driver: Option<String>,
    pub formats: Vec<PixelFormatInfo>,
    pub resolutions: Vec<String>,
    pub frame_rates: Vec<String>,
    pub probed_at: DateTime<Utc>,
    pub diagnostics: ProbeDiagnostics,
}

/// Default rates returned when the detection pipeline found none of its own,
/// per §4.A. Only emitted when `probe_attempted_and_accessible` is true (§9
/// open question: a fallback for a permission-denied probe would mislead
/// clients into believing the device offers standard rates).
pub const DEFAULT_FRAME_RATES: [&str; 6] = ["30", "25", "24", "15", "10", "5"];

impl CapabilityProbe {
    pub fn failure(device_path: &str, diagnostics: ProbeDiagnostics) -> Self {
        Self {
            device_path: device_path.to_string(),
            detected: false,
            name: None,
            driver: None,
            formats: Vec::new(),
            resolutions: Vec::new(),
            frame_rates: Vec::new(),
            probed_at: Utc::now(),
            diagnostics,
        }
    }
}
