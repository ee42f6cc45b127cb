//! Typed HTTP client for the MediaMTX configuration/query API (§4.C).
//!
//! Grounded in `controller.py`'s `MediaMTXController` (idempotent
//! create/delete, 200/201/409 and 200/204/404 handling) reimplemented over
//! `reqwest` the way the teacher's `update` module uses it for outbound
//! HTTP, with the request discipline §4.C spells out explicitly: total
//! timeout 10s, connect timeout 5s, pool capped at 10 (5 per host).

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::MediaMtxConfig;
use crate::error::{AppError, Result};
use crate::mediamtx::types::{
    known_configuration_schema, ConfigPrimitive, HealthCheckResult, StreamConfig, StreamStatus, StreamUrls,
};

const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Thin, idempotent wrapper over MediaMTX's `/v3/config/...` and
/// `/v3/paths/...` REST surface.
#[derive(Clone)]
pub struct MediaMtxClient {
    http: Client,
    base_url: String,
    host: String,
    rtsp_port: u16,
    webrtc_port: u16,
    hls_port: u16,
    started_at: Instant,
}

impl MediaMtxClient {
    pub fn new(config: &MediaMtxConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(AppError::Http)?;

        Ok(Self {
            http,
            base_url: format!("http://{}:{}", config.host, config.api_port),
            host: config.host.clone(),
            rtsp_port: config.rtsp_port,
            webrtc_port: config.webrtc_port,
            hls_port: config.hls_port,
            started_at: Instant::now(),
        })
    }

    pub fn urls_for(&self, name: &str) -> StreamUrls {
        StreamUrls {
            rtsp: format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, name),
            webrtc: format!("http://{}:{}/{}", self.host, self.webrtc_port, name),
            hls: format!("http://{}:{}/{}", self.host, self.hls_port, name),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, correlation_id: &str) -> reqwest::RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path)).header(CORRELATION_HEADER, correlation_id)
    }

    /// §4.C `health_check`: fails with `ConnectionError` on transport error.
    pub async fn health_check(&self, correlation_id: &str) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let response = self
            .request(reqwest::Method::GET, "/v3/config/global/get", correlation_id)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable: {e}")))?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        if !response.status().is_success() {
            return Err(AppError::UpstreamFailed(format!(
                "health check failed: HTTP {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(HealthCheckResult {
            status: "healthy".to_string(),
            version: body.get("serverVersion").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            response_time_ms,
        })
    }

    /// §4.C `create_stream`: success on 200/201/409; 409 returns URLs as if
    /// newly created (idempotent).
    pub async fn create_stream(&self, config: &StreamConfig, correlation_id: &str) -> Result<StreamUrls> {
        let mut body = json!({
            "source": config.source,
            "sourceProtocol": "automatic",
            "record": config.record,
        });
        if config.record {
            if let Some(record_path) = &config.record_path {
                body["recordPath"] = json!(record_path);
            }
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/v3/config/paths/add/{}", config.name), correlation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during create_stream: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                info!(path = %config.name, "created stream path");
                Ok(self.urls_for(&config.name))
            }
            StatusCode::CONFLICT => {
                info!(path = %config.name, "stream path already exists");
                Ok(self.urls_for(&config.name))
            }
            status => Err(AppError::UpstreamFailed(format!("create_stream {} failed: HTTP {status}", config.name))),
        }
    }

    /// §4.C `delete_stream`: success on 200/204/404 (404 is idempotent success).
    pub async fn delete_stream(&self, name: &str, correlation_id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("/v3/config/paths/delete/{name}"), correlation_id)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during delete_stream: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                info!(path = name, "deleted stream path (or already absent)");
                Ok(())
            }
            status => Err(AppError::UpstreamFailed(format!("delete_stream {name} failed: HTTP {status}"))),
        }
    }

    /// PATCH-equivalent path edit that toggles `record`. `start_recording`
    /// and `stop_recording` in §4.F both route through this.
    pub async fn set_path_recording(
        &self,
        name: &str,
        record: bool,
        record_path: Option<&str>,
        duration_secs: Option<u64>,
        correlation_id: &str,
    ) -> Result<()> {
        let mut body = json!({ "record": record });
        if let Some(record_path) = record_path {
            body["recordPath"] = json!(record_path);
        }
        if let Some(duration) = duration_secs {
            body["recordDuration"] = json!(duration);
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/v3/config/paths/edit/{name}"), correlation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during path edit: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::UpstreamFailed(format!("path edit {name} failed: HTTP {}", response.status())))
        }
    }

    /// §4.C `get_stream_list`.
    pub async fn get_stream_list(&self, correlation_id: &str) -> Result<Vec<StreamStatus>> {
        let response = self
            .request(reqwest::Method::GET, "/v3/paths/list", correlation_id)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during get_stream_list: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamFailed(format!("get_stream_list failed: HTTP {}", response.status())));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let items = body.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(items.into_iter().filter_map(parse_stream_status).collect())
    }

    /// §4.C `get_stream_status`: 404 maps to `NotFound`.
    pub async fn get_stream_status(&self, name: &str, correlation_id: &str) -> Result<StreamStatus> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v3/paths/get/{name}"), correlation_id)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during get_stream_status: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("stream path {name}")));
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamFailed(format!("get_stream_status {name} failed: HTTP {}", response.status())));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        parse_stream_status(body).ok_or_else(|| AppError::UpstreamFailed(format!("malformed status payload for {name}")))
    }

    /// §4.C `update_configuration`: local schema validation before any
    /// network call (rejects unknown keys, type/enum/range mismatches).
    pub async fn update_configuration(&self, name: &str, options: &Value, correlation_id: &str) -> Result<()> {
        validate_configuration(options)?;

        let response = self
            .request(reqwest::Method::POST, &format!("/v3/config/paths/edit/{name}"), correlation_id)
            .json(options)
            .send()
            .await
            .map_err(|e| AppError::UpstreamFailed(format!("MediaMTX unreachable during update_configuration: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::UpstreamFailed(format!("update_configuration {name} failed: HTTP {}", response.status())))
        }
    }
}

/// Lets the health supervisor probe this client without depending on its
/// full API surface (§4.D drives liveness purely off `health_check`).
#[async_trait::async_trait]
impl crate::health::HealthProbe for MediaMtxClient {
    async fn probe(&self) -> Result<()> {
        self.health_check("health-supervisor").await.map(|_| ())
    }
}

fn parse_stream_status(value: Value) -> Option<StreamStatus> {
    Some(StreamStatus {
        name: value.get("name")?.as_str()?.to_string(),
        source: value.get("source").and_then(Value::as_str).unwrap_or_default().to_string(),
        ready: value.get("ready").and_then(Value::as_bool).unwrap_or(false),
        readers: value.get("readers").and_then(Value::as_array).map(|a| a.len() as u32).unwrap_or(0),
        bytes_sent: value.get("bytesSent").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Reject unknown keys and values outside a key's declared type/enum/range
/// (§4.C "Configuration validation"). Runs before any network call.
fn validate_configuration(options: &Value) -> Result<()> {
    let schema = known_configuration_schema();
    let object = options
        .as_object()
        .ok_or_else(|| AppError::InvalidParams("configuration options must be a JSON object".to_string()))?;

    for (key, value) in object {
        let spec = schema
            .get(key.as_str())
            .ok_or_else(|| AppError::InvalidParams(format!("unknown configuration key '{key}'")))?;

        match spec.primitive {
            ConfigPrimitive::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| AppError::InvalidParams(format!("'{key}' must be a string")))?;
                if let Some(allowed) = &spec.allowed_values {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(AppError::InvalidParams(format!("'{key}' must be one of {allowed:?}")));
                    }
                }
            }
            ConfigPrimitive::Bool => {
                value.as_bool().ok_or_else(|| AppError::InvalidParams(format!("'{key}' must be a boolean")))?;
            }
            ConfigPrimitive::Number => {
                let n = value.as_f64().ok_or_else(|| AppError::InvalidParams(format!("'{key}' must be a number")))?;
                if let Some(min) = spec.min {
                    if n < min {
                        return Err(AppError::InvalidParams(format!("'{key}' must be >= {min}")));
                    }
                }
                if let Some(max) = spec.max {
                    if n > max {
                        return Err(AppError::InvalidParams(format!("'{key}' must be <= {max}")));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_rejected_locally() {
        let err = validate_configuration(&json!({ "bogus": 1 })).unwrap_err();
        assert!(err.to_string().contains("unknown configuration key"));
    }

    #[test]
    fn out_of_range_number_is_rejected() {
        let err = validate_configuration(&json!({ "recordDuration": 999999 })).unwrap_err();
        assert!(err.to_string().contains("<="));
    }

    #[test]
    fn disallowed_enum_value_is_rejected() {
        let err = validate_configuration(&json!({ "sourceProtocol": "quic" })).unwrap_err();
        assert!(err.to_string().contains("one of"));
    }

    #[test]
    fn valid_known_keys_pass_validation() {
        assert!(validate_configuration(&json!({ "record": true, "recordDuration": 30 })).is_ok());
    }

    #[tokio::test]
    async fn stream_urls_use_configured_ports() {
        let config = MediaMtxConfig {
            host: "127.0.0.1".to_string(),
            rtsp_port: 8554,
            webrtc_port: 8889,
            hls_port: 8888,
            ..MediaMtxConfig::default()
        };
        let client = MediaMtxClient::new(&config).unwrap();
        let urls = client.urls_for("cam0");
        assert_eq!(urls.rtsp, "rtsp://127.0.0.1:8554/cam0");
        assert_eq!(urls.webrtc, "http://127.0.0.1:8889/cam0");
        assert_eq!(urls.hls, "http://127.0.0.1:8888/cam0");
    }
}
