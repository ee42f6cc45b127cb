//! Snapshot capture (§4.F "Snapshot").
//!
//! Spawns the external encoder against a stream's RTSP URL for a single
//! frame, argv shape grounded in `original_source/controller.py`'s
//! `take_snapshot` (`-y -i <rtsp> -vframes 1 -q:v 2 -timeout 5000000
//! <path>`), reimplemented over `tokio::process::Command` the way
//! `extensions/manager.rs` supervises its subprocesses.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::mediamtx::SnapshotResult;
use crate::recording::process::cleanup_if_running;

const PROCESS_CREATION_TIMEOUT: Duration = Duration::from_secs(10);
const PROCESS_EXECUTION_TIMEOUT: Duration = Duration::from_secs(15);
const SOCKET_TIMEOUT_MICROS: u64 = 5_000_000;

pub struct SnapshotCapture {
    encoder_tool: String,
    snapshots_dir: PathBuf,
}

impl SnapshotCapture {
    pub fn new(encoder_tool: impl Into<String>, snapshots_dir: PathBuf) -> Self {
        Self {
            encoder_tool: encoder_tool.into(),
            snapshots_dir,
        }
    }

    /// Generates `<stream>_snapshot_<YYYY-MM-DD_HH-MM-SS>.jpg` when `filename`
    /// is absent, ensures the directory exists, and runs the encoder under
    /// the 10s spawn / 15s execution deadlines with mandatory cleanup on
    /// every exit.
    pub async fn take_snapshot(&self, stream_name: &str, rtsp_url: &str, filename: Option<String>) -> SnapshotResult {
        let filename = filename.unwrap_or_else(|| default_snapshot_filename(stream_name));

        if let Err(err) = fs::create_dir_all(&self.snapshots_dir).await {
            error!(dir = %self.snapshots_dir.display(), error = %err, "cannot create snapshots directory");
            return SnapshotResult {
                stream_name: stream_name.to_string(),
                filename,
                status: "failed".to_string(),
                file_size: 0,
                file_path: None,
                error: Some(format!("snapshots directory unavailable: {err}")),
            };
        }

        let output_path = self.snapshots_dir.join(&filename);
        self.run_encoder(stream_name, rtsp_url, &output_path, &filename).await
    }

    async fn run_encoder(&self, stream_name: &str, rtsp_url: &str, output_path: &Path, filename: &str) -> SnapshotResult {
        let mut cmd = Command::new(&self.encoder_tool);
        cmd.args([
            "-y",
            "-i",
            rtsp_url,
            "-vframes",
            "1",
            "-q:v",
            "2",
            "-timeout",
            &SOCKET_TIMEOUT_MICROS.to_string(),
        ])
        .arg(output_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let spawn_result = tokio::time::timeout(PROCESS_CREATION_TIMEOUT, async { cmd.spawn() }).await;
        let mut child = match spawn_result {
            Ok(Ok(child)) => child,
            Ok(Err(err)) => {
                return failure_result(stream_name, filename, format!("failed to start encoder: {err}"));
            }
            Err(_) => {
                return failure_result(stream_name, filename, "timed out starting encoder process".to_string());
            }
        };

        // `wait()` borrows rather than consumes the child, so on a timeout we
        // still hold it and can run the mandatory graceful->kill escalation
        // (§4.F, §9) instead of relying solely on `kill_on_drop`.
        match tokio::time::timeout(PROCESS_EXECUTION_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => self.success_result(stream_name, filename, output_path).await,
            Ok(Ok(_)) => {
                let stderr = read_all(child.stderr.take()).await;
                warn!(stream = %stream_name, stderr = %stderr, "encoder exited non-zero");
                failure_result(stream_name, filename, stderr)
            }
            Ok(Err(err)) => failure_result(stream_name, filename, format!("failed waiting on encoder: {err}")),
            Err(_) => {
                let outcome = cleanup_if_running(&mut child).await;
                warn!(stream = %stream_name, ?outcome, "encoder execution timed out");
                failure_result(
                    stream_name,
                    filename,
                    format!("snapshot encoder timed out and was {}", describe_outcome(outcome)),
                )
            }
        }
    }

    async fn success_result(&self, stream_name: &str, filename: &str, output_path: &Path) -> SnapshotResult {
        match fs::metadata(output_path).await {
            Ok(metadata) => {
                info!(stream = %stream_name, file = %filename, size = metadata.len(), "snapshot captured");
                SnapshotResult {
                    stream_name: stream_name.to_string(),
                    filename: filename.to_string(),
                    status: "success".to_string(),
                    file_size: metadata.len(),
                    file_path: Some(output_path.display().to_string()),
                    error: None,
                }
            }
            Err(err) => failure_result(stream_name, filename, format!("encoder succeeded but output is unreadable: {err}")),
        }
    }
}

fn default_snapshot_filename(stream_name: &str) -> String {
    format!("{stream_name}_snapshot_{}.jpg", Utc::now().format("%Y-%m-%d_%H-%M-%S"))
}

fn failure_result(stream_name: &str, filename: &str, error: String) -> SnapshotResult {
    SnapshotResult {
        stream_name: stream_name.to_string(),
        filename: filename.to_string(),
        status: "failed".to_string(),
        file_size: 0,
        file_path: None,
        error: Some(error),
    }
}

async fn read_all(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// §8 scenario 4 expects the error text to mention "killed" or "terminated".
fn describe_outcome(outcome: crate::recording::process::TerminationOutcome) -> &'static str {
    use crate::recording::process::TerminationOutcome;
    match outcome {
        TerminationOutcome::AlreadyExited => "already exited",
        TerminationOutcome::Terminated => "terminated",
        TerminationOutcome::Killed => "killed",
        TerminationOutcome::ForceExit => "killed (force exit)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filename_has_stream_prefix_and_jpg_extension() {
        let name = default_snapshot_filename("cam0");
        assert!(name.starts_with("cam0_snapshot_"));
        assert!(name.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn missing_encoder_binary_yields_structured_failure() {
        let dir = tempfile::tempdir().unwrap();
        let capture = SnapshotCapture::new("definitely-not-a-real-encoder", dir.path().to_path_buf());
        let result = capture.take_snapshot("cam0", "rtsp://127.0.0.1:8554/cam0", None).await;
        assert_eq!(result.status, "failed");
        assert!(result.error.is_some());
    }
}
