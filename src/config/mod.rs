//! Typed configuration tree for the camera service daemon.
//!
//! This crate does not parse a configuration file format (out of scope); callers
//! build an [`AppConfig`] however they like (defaults, a deserialized document, CLI
//! overrides) and fold it into the shared [`crate::rpc::RpcContext`]. Every section
//! implements `Default` so a partially-specified config is always valid.

use std::env;

use serde::{Deserialize, Serialize};

/// Root configuration object, matching the recognized sections of the external
/// interface: `server`, `mediamtx`, `camera`, `security`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mediamtx: MediaMtxConfig,
    pub camera: CameraConfig,
    pub security: SecurityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            mediamtx: MediaMtxConfig::default(),
            camera: CameraConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Overlay recognized environment variables onto an already-built config.
    ///
    /// `prefix` is the environment-variable prefix (e.g. `CAMERA_SERVICE`); the
    /// three recognized variables are `<PREFIX>_JWT_SECRET`, `<PREFIX>_API_KEYS_PATH`,
    /// and `<PREFIX>_RATE_RPM`. Unset variables leave the existing value untouched.
    pub fn apply_env_overlay(&mut self, prefix: &str) {
        if let Ok(secret) = env::var(format!("{prefix}_JWT_SECRET")) {
            self.security.token_secret = secret;
        }
        if let Ok(path) = env::var(format!("{prefix}_API_KEYS_PATH")) {
            self.security.api_keys_path = path;
        }
        if let Ok(rpm) = env::var(format!("{prefix}_RATE_RPM")) {
            if let Ok(rpm) = rpm.parse::<u32>() {
                self.security.requests_per_minute = rpm;
            }
        }
    }
}

/// Control-channel server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub websocket_path: String,
    pub max_connections: usize,
    /// HTTP port serving `/files/...` and `/health/...` (§4.J, §6).
    pub file_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
            websocket_path: "/ws".to_string(),
            max_connections: 100,
            file_port: 8003,
        }
    }
}

/// Upstream media server settings and health-probe tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMtxConfig {
    pub host: String,
    pub api_port: u16,
    pub rtsp_port: u16,
    pub webrtc_port: u16,
    pub hls_port: u16,
    pub recordings_path: String,
    pub snapshots_path: String,
    pub health_check_interval_secs: u64,
    pub health_failure_threshold: u32,
    pub health_circuit_breaker_timeout_secs: u64,
    pub health_recovery_confirmation_threshold: u32,
    pub health_backoff_base_multiplier: f64,
    pub health_max_backoff_secs: u64,
    pub health_jitter_range: f64,
}

impl Default for MediaMtxConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            api_port: 9997,
            rtsp_port: 8554,
            webrtc_port: 8889,
            hls_port: 8888,
            recordings_path: "/var/lib/camera-service/recordings".to_string(),
            snapshots_path: "/var/lib/camera-service/snapshots".to_string(),
            health_check_interval_secs: 5,
            health_failure_threshold: 3,
            health_circuit_breaker_timeout_secs: 60,
            health_recovery_confirmation_threshold: 3,
            health_backoff_base_multiplier: 2.0,
            health_max_backoff_secs: 60,
            health_jitter_range: 0.2,
        }
    }
}

/// Device discovery/probing tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Inclusive numeric index range to monitor, e.g. `0..=15` for `/dev/video0`..`/dev/video15`.
    pub device_range: (u32, u32),
    pub poll_interval_secs: f64,
    pub detection_timeout_secs: f64,
    pub enable_capability_detection: bool,
    pub device_prefix: String,
    pub freshness_threshold_secs: f64,
    pub max_consecutive_failures: u32,
    pub stability_threshold: u32,
    pub confirmation_threshold: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_range: (0, 15),
            poll_interval_secs: 5.0,
            detection_timeout_secs: 5.0,
            enable_capability_detection: true,
            device_prefix: "/dev/video".to_string(),
            freshness_threshold_secs: 15.0,
            max_consecutive_failures: 5,
            stability_threshold: 3,
            confirmation_threshold: 2,
        }
    }
}

/// Authentication, authorization and rate-limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Symmetric secret for HMAC-signed tokens. Not persisted by this crate.
    pub token_secret: String,
    pub api_keys_path: String,
    pub requests_per_minute: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            api_keys_path: "/var/lib/camera-service/api-keys.json".to_string(),
            requests_per_minute: 120,
            rate_limit_window_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8002);
        assert_eq!(config.camera.device_range, (0, 15));
        assert_eq!(config.security.requests_per_minute, 120);
    }

    #[test]
    fn env_overlay_applies_only_set_vars() {
        let prefix = "CAMERA_SERVICE_TEST_OVERLAY";
        env::set_var(format!("{prefix}_JWT_SECRET"), "s3cr3t");
        env::set_var(format!("{prefix}_RATE_RPM"), "42");
        env::remove_var(format!("{prefix}_API_KEYS_PATH"));

        let mut config = AppConfig::default();
        config.apply_env_overlay(prefix);

        assert_eq!(config.security.token_secret, "s3cr3t");
        assert_eq!(config.security.requests_per_minute, 42);
        assert_eq!(config.security.api_keys_path, SecurityConfig::default().api_keys_path);

        env::remove_var(format!("{prefix}_JWT_SECRET"));
        env::remove_var(format!("{prefix}_RATE_RPM"));
    }
}
