//! Wire/result types for the MediaMTX HTTP client (§3 `StreamPath`, §4.C).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Result of [`crate::mediamtx::client::MediaMtxClient::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub response_time_ms: u64,
}

/// Parameters for `create_stream` (§4.C table).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    pub source: String,
    pub record: bool,
    pub record_path: Option<String>,
}

/// URLs returned for a stream path across transports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamUrls {
    pub rtsp: String,
    pub webrtc: String,
    pub hls: String,
}

/// One entry from `get_stream_list` / `get_stream_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    pub name: String,
    pub source: String,
    pub ready: bool,
    pub readers: u32,
    pub bytes_sent: u64,
}

/// Result of `start_recording` / `stop_recording`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingResult {
    pub stream_name: String,
    pub filename: String,
    pub status: String,
    pub duration_secs: Option<f64>,
    pub file_size: Option<u64>,
}

/// Result of `take_snapshot` (§4.F).
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResult {
    pub stream_name: String,
    pub filename: String,
    pub status: String,
    pub file_size: u64,
    pub file_path: Option<String>,
    pub error: Option<String>,
}

/// A single key's schema for `update_configuration` validation (§4.C
/// "Configuration validation").
#[derive(Debug, Clone)]
pub struct ConfigKeySchema {
    pub primitive: ConfigPrimitive,
    pub allowed_values: Option<Vec<String>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPrimitive {
    String,
    Number,
    Bool,
}

/// The declared schema for `update_configuration`'s known keys.
pub fn known_configuration_schema() -> HashMap<&'static str, ConfigKeySchema> {
    let mut schema = HashMap::new();
    schema.insert(
        "sourceProtocol",
        ConfigKeySchema {
            primitive: ConfigPrimitive::String,
            allowed_values: Some(vec!["automatic".to_string(), "tcp".to_string(), "udp".to_string()]),
            min: None,
            max: None,
        },
    );
    schema.insert(
        "record",
        ConfigKeySchema {
            primitive: ConfigPrimitive::Bool,
            allowed_values: None,
            min: None,
            max: None,
        },
    );
    schema.insert(
        "recordDuration",
        ConfigKeySchema {
            primitive: ConfigPrimitive::Number,
            allowed_values: None,
            min: Some(1.0),
            max: Some(86400.0),
        },
    );
    schema
}
