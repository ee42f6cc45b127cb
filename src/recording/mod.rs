//! Snapshot/Recording Driver (§4.F).
//!
//! Owns `recording_sessions` behind its own mutex (§5 "guarded by the
//! Recording Driver's internal mutex; stop-on-failure path keeps the
//! entry") and delegates the actual path toggle to
//! [`crate::mediamtx::MediaMtxClient::set_path_recording`].

pub mod process;
pub mod session;
pub mod snapshot;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::mediamtx::{MediaMtxClient, RecordingResult, SnapshotResult};
use crate::recording::session::RecordingSession;
use crate::recording::snapshot::SnapshotCapture;

pub struct RecordingDriver {
    client: Arc<MediaMtxClient>,
    snapshot: SnapshotCapture,
    recordings_path: PathBuf,
    sessions: Mutex<HashMap<String, RecordingSession>>,
}

impl RecordingDriver {
    pub fn new(client: Arc<MediaMtxClient>, encoder_tool: impl Into<String>, recordings_path: PathBuf, snapshots_path: PathBuf) -> Self {
        Self {
            client,
            snapshot: SnapshotCapture::new(encoder_tool, snapshots_path),
            recordings_path,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn take_snapshot(&self, stream_name: &str, rtsp_url: &str, filename: Option<String>) -> SnapshotResult {
        self.snapshot.take_snapshot(stream_name, rtsp_url, filename).await
    }

    /// Start: ensures no active session for the path, configures
    /// `record=true`, registers a `RecordingSession`.
    pub async fn start_recording(
        &self,
        stream_name: &str,
        duration_secs: Option<u64>,
        format: &str,
        correlation_id: &str,
    ) -> Result<RecordingResult> {
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(stream_name) {
                return Err(AppError::InvalidRequest(format!("recording already active for {stream_name}")));
            }
        }

        let filename = format!("{stream_name}_{}.{format}", chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        let record_path = self.recordings_path.join(&filename).display().to_string();

        self.client
            .set_path_recording(stream_name, true, Some(&record_path), duration_secs, correlation_id)
            .await?;

        let session = RecordingSession::new(stream_name, filename.clone(), duration_secs, format, correlation_id);
        self.sessions.lock().await.insert(stream_name.to_string(), session);
        info!(stream = %stream_name, filename = %filename, "recording started");

        Ok(RecordingResult {
            stream_name: stream_name.to_string(),
            filename,
            status: "recording".to_string(),
            duration_secs: None,
            file_size: None,
        })
    }

    /// Stop: computes `duration = now - session.start`, configures
    /// `record=false`, reads file size if present. On API failure the
    /// session is retained for retry; only a successful stop clears it.
    pub async fn stop_recording(&self, stream_name: &str, correlation_id: &str) -> Result<RecordingResult> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(stream_name)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("no active recording for {stream_name}")))?
        };

        self.client.set_path_recording(stream_name, false, None, None, correlation_id).await?;

        self.sessions.lock().await.remove(stream_name);

        let duration_secs = session.elapsed_secs();
        let record_path = self.recordings_path.join(&session.filename);
        let file_size = match fs::metadata(&record_path).await {
            Ok(metadata) => Some(metadata.len()),
            Err(err) => {
                warn!(file = %session.filename, error = %err, "recording file unreadable after stop");
                None
            }
        };

        info!(stream = %stream_name, duration_secs, "recording stopped");
        Ok(RecordingResult {
            stream_name: stream_name.to_string(),
            filename: session.filename,
            status: "stopped".to_string(),
            duration_secs: Some(duration_secs),
            file_size,
        })
    }

    pub async fn active_session(&self, stream_name: &str) -> Option<RecordingSession> {
        self.sessions.lock().await.get(stream_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaMtxConfig;

    fn driver() -> RecordingDriver {
        let client = Arc::new(MediaMtxClient::new(&MediaMtxConfig::default()).unwrap());
        RecordingDriver::new(client, "ffmpeg", PathBuf::from("/tmp/recordings"), PathBuf::from("/tmp/snapshots"))
    }

    #[tokio::test]
    async fn stop_without_active_session_is_not_found() {
        let driver = driver();
        let err = driver.stop_recording("cam0", "corr-1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
