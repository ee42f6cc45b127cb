//! MediaMTX HTTP Client (§4.C).

pub mod client;
pub mod types;

pub use client::MediaMtxClient;
pub use types::{
    known_configuration_schema, ConfigKeySchema, ConfigPrimitive, HealthCheckResult, RecordingResult,
    SnapshotResult, StreamConfig, StreamStatus, StreamUrls,
};
