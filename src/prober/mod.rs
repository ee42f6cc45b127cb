//! Device Capability Prober (§4.A).
//!
//! Runs an external video-device introspection tool (`v4l2-ctl` by convention;
//! the binary name is configurable for testing) against a device path and
//! parses its output into a [`CapabilityProbe`]. Every invocation is
//! independently timed out via `tokio::process::Command` with
//! `kill_on_drop(true)`, mirroring the subprocess-supervision idiom used
//! elsewhere in this crate (§4.F) — on a timeout the in-flight `Child` is
//! dropped and the kernel reaps it, so the prober never leaks a process.
//! The prober never propagates an error: every exit path returns a
//! (possibly failed) `CapabilityProbe`.

pub mod parser;
pub mod types;

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;

pub use types::{CapabilityProbe, PixelFormatInfo, ProbeDiagnostics, ProbeErrorCode, ProbeStageOutcome};

/// Probes device capability by shelling out to an introspection tool.
pub struct DeviceProber {
    tool: String,
    detection_timeout: Duration,
}

impl DeviceProber {
    pub fn new(detection_timeout: Duration) -> Self {
        Self {
            tool: "v4l2-ctl".to_string(),
            detection_timeout,
        }
    }

    /// Override the introspection binary name, e.g. for tests that stub it out.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    async fn run_invocation(&self, device_path: &str, args: &[&str]) -> Result<String, ProbeErrorCode> {
        let mut cmd = Command::new(&self.tool);
        cmd.arg("--device")
            .arg(device_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(_) => return Err(ProbeErrorCode::ProcessError),
        };

        match tokio::time::timeout(self.detection_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(_)) => Err(ProbeErrorCode::ProcessError),
            Ok(Err(_)) => Err(ProbeErrorCode::ProcessError),
            Err(_) => Err(ProbeErrorCode::Timeout),
        }
    }

    /// Probe a device, returning a structured result within the configured
    /// deadline. Never hangs, never panics on a missing/inaccessible device.
    pub async fn probe(&self, device_path: &str) -> CapabilityProbe {
        let started = Instant::now();
        let mut stages = Vec::new();
        let mut outputs = Vec::new();
        let mut first_error = None;

        for (stage, args) in [("info", &["--info"][..]), ("formats", &["--list-formats-ext"][..])] {
            match self.run_invocation(device_path, args).await {
                Ok(output) => {
                    stages.push(ProbeStageOutcome {
                        stage: stage.to_string(),
                        matched: true,
                    });
                    outputs.push(output);
                }
                Err(code) => {
                    stages.push(ProbeStageOutcome {
                        stage: stage.to_string(),
                        matched: false,
                    });
                    first_error.get_or_insert(code);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        if outputs.is_empty() {
            let code = first_error.unwrap_or(ProbeErrorCode::ProcessError);
            let mut diagnostics = ProbeDiagnostics::failed(duration_ms, code, format!("no introspection output for {device_path}"));
            diagnostics.stages = stages;
            return CapabilityProbe::failure(device_path, diagnostics);
        }

        let combined = outputs.join("\n");
        let (name, driver) = parser::extract_device_info(&combined);
        let formats = parser::extract_formats(&combined);
        let resolutions = parser::extract_resolutions(&combined);

        let mut frequency = HashMap::new();
        parser::extract_frame_rate_candidates(&combined, &mut frequency);
        let mut frame_rates = parser::select_frame_rates(&frequency);
        let mut rates_are_fallback = false;
        if frame_rates.is_empty() {
            frame_rates = types::DEFAULT_FRAME_RATES.iter().map(|s| s.to_string()).collect();
            rates_are_fallback = true;
        }

        CapabilityProbe {
            device_path: device_path.to_string(),
            detected: true,
            name,
            driver,
            formats,
            resolutions,
            frame_rates,
            probed_at: Utc::now(),
            diagnostics: ProbeDiagnostics {
                duration_ms,
                stages,
                error_code: first_error,
                error_context: None,
                rates_are_fallback,
                probe_attempted_and_accessible: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_of_missing_tool_yields_structured_failure() {
        let prober = DeviceProber::new(Duration::from_secs(2)).with_tool("definitely-not-a-real-binary");
        let probe = prober.probe("/dev/video0").await;
        assert!(!probe.detected);
        assert_eq!(probe.diagnostics.error_code, Some(ProbeErrorCode::ProcessError));
        assert!(probe.diagnostics.probe_attempted_and_accessible);
    }

    #[tokio::test]
    async fn failed_probe_never_panics_and_completes_within_deadline() {
        let prober = DeviceProber::new(Duration::from_millis(200)).with_tool("definitely-not-a-real-binary");
        let started = Instant::now();
        let _ = prober.probe("/dev/video9").await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
