//! Recording session bookkeeping (§3 `RecordingSession`, §4.F "Recording").

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Active recording bookkeeping keyed by stream path. At most one session
/// per path (§3 invariant); stop-on-API-failure retains the entry for retry
/// (§4.F "the session is retained for retry; only a successful stop clears
/// it").
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub stream_name: String,
    pub filename: String,
    pub start_instant: Instant,
    pub start_wall: DateTime<Utc>,
    pub requested_duration_secs: Option<u64>,
    pub format: String,
    pub correlation_id: String,
}

impl RecordingSession {
    pub fn new(stream_name: impl Into<String>, filename: impl Into<String>, requested_duration_secs: Option<u64>, format: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            filename: filename.into(),
            start_instant: Instant::now(),
            start_wall: Utc::now(),
            requested_duration_secs,
            format: format.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_instant.elapsed().as_secs_f64()
    }
}
