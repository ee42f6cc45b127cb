//! Built-in method handlers (§4.H "Method registry" table).
//!
//! Each handler deserializes `params` into a typed structure and returns a
//! typed (here: `serde_json::Value`) result — no runtime reflection (§9).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::auth::{AuthMode, Principal};
use crate::discovery::{stream_name_for, CapabilityStatus};
use crate::error::{AppError, Result};
use crate::health::HealthStatus;
use crate::rpc::context::RpcContext;

fn params_or_empty(params: Value) -> Value {
    if params.is_null() {
        json!({})
    } else {
        params
    }
}

fn require_string_field(params: &Value, field: &str) -> Result<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidParams(format!("missing required field '{field}'")))
}

pub(crate) fn camera_id_from_device(device_path: &str) -> Result<u32> {
    device_path
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::InvalidParams(format!("cannot derive camera id from '{device_path}'")))
}

pub async fn authenticate(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let credential = require_string_field(&params, "credential")?;
    let mode = params
        .get("auth_method")
        .and_then(Value::as_str)
        .and_then(|s| match s {
            "token" => Some(AuthMode::Token),
            "api_key" => Some(AuthMode::ApiKey),
            _ => None,
        })
        .unwrap_or(AuthMode::Auto);

    let result = ctx.authenticator.authenticate(&credential, mode).await;
    match result.principal {
        Some(principal) => Ok(serde_json::to_value(&principal)?),
        None => Err(AppError::AuthFailed(result.error_message.unwrap_or_default())),
    }
}

pub async fn ping(_ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    Ok(json!("pong"))
}

pub async fn get_camera_list(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    let devices = ctx.discovery.snapshot_devices().await;
    let connected = devices.iter().filter(|d| d.status == crate::discovery::DeviceStatus::Connected).count();
    let cameras: Vec<Value> = devices
        .iter()
        .map(|d| {
            json!({
                "device": d.path,
                "index": d.index,
                "name": d.name,
                "stream_name": stream_name_for(&d.path),
                "status": format!("{:?}", d.status).to_uppercase(),
            })
        })
        .collect();
    Ok(json!({ "cameras": cameras, "total": cameras.len(), "connected": connected }))
}

pub async fn get_camera_status(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let device_path = require_string_field(&params, "device")?;
    let device = ctx
        .discovery
        .device(&device_path)
        .await
        .ok_or_else(|| AppError::NotFound(format!("device {device_path}")))?;
    Ok(json!({
        "device": device.path,
        "index": device.index,
        "name": device.name,
        "stream_name": stream_name_for(&device.path),
        "status": format!("{:?}", device.status).to_uppercase(),
    }))
}

pub async fn get_streams(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    let streams = ctx.mediamtx.get_stream_list("rpc-get_streams").await?;
    Ok(serde_json::to_value(streams)?)
}

#[derive(Deserialize, Default)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

async fn list_directory(dir: &str, params: Value) -> Result<Value> {
    let list_params: ListParams = serde_json::from_value(params_or_empty(params)).unwrap_or_default();
    let limit = list_params.limit.unwrap_or(50).min(500);
    let offset = list_params.offset.unwrap_or(0);

    let mut entries = Vec::new();
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(_) => {
            return Ok(json!({ "files": [], "total": 0 }));
        }
    };
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        if let Ok(metadata) = entry.metadata().await {
            if metadata.is_file() {
                entries.push((entry.file_name().to_string_lossy().into_owned(), metadata.len()));
            }
        }
    }
    entries.sort();
    let total = entries.len();
    let page: Vec<Value> = entries
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(name, size)| json!({ "filename": name, "file_size": size }))
        .collect();
    Ok(json!({ "files": page, "total": total }))
}

pub async fn list_recordings(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    list_directory(&ctx.config.mediamtx.recordings_path, params).await
}

pub async fn list_snapshots(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    list_directory(&ctx.config.mediamtx.snapshots_path, params).await
}

async fn file_info(dir: &str, filename: &str) -> Result<Value> {
    if filename.contains('/') || filename.contains("..") {
        return Err(AppError::InvalidParams("filename must be a single path component".to_string()));
    }
    let path = std::path::Path::new(dir).join(filename);
    let metadata = fs::metadata(&path).await.map_err(|_| AppError::NotFound(filename.to_string()))?;
    Ok(json!({
        "filename": filename,
        "file_size": metadata.len(),
    }))
}

pub async fn get_recording_info(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let filename = require_string_field(&params, "filename")?;
    file_info(&ctx.config.mediamtx.recordings_path, &filename).await
}

pub async fn get_snapshot_info(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let filename = require_string_field(&params, "filename")?;
    file_info(&ctx.config.mediamtx.snapshots_path, &filename).await
}

pub async fn take_snapshot(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let device_path = require_string_field(&params, "device")?;
    let filename = params.get("filename").and_then(Value::as_str).map(str::to_string);
    let camera_id = camera_id_from_device(&device_path)?;
    let stream_name = crate::path_manager::stream_name_for_camera(camera_id);
    let urls = ctx.path_manager.urls_for_camera(camera_id);

    let result = ctx.recording.take_snapshot(&stream_name, &urls.rtsp, filename).await;
    Ok(serde_json::to_value(result)?)
}

pub async fn start_recording(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let device_path = require_string_field(&params, "device")?;
    let duration = params.get("duration").and_then(Value::as_u64);
    let format = params.get("format").and_then(Value::as_str).unwrap_or("mp4").to_string();
    let camera_id = camera_id_from_device(&device_path)?;
    let stream_name = crate::path_manager::stream_name_for_camera(camera_id);

    let result = ctx.recording.start_recording(&stream_name, duration, &format, "rpc-start_recording").await?;
    Ok(serde_json::to_value(result)?)
}

pub async fn stop_recording(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let device_path = require_string_field(&params, "device")?;
    let camera_id = camera_id_from_device(&device_path)?;
    let stream_name = crate::path_manager::stream_name_for_camera(camera_id);

    let result = ctx.recording.stop_recording(&stream_name, "rpc-stop_recording").await?;
    Ok(serde_json::to_value(result)?)
}

pub async fn delete_recording(ctx: Arc<RpcContext>, _principal: Option<Principal>, params: Value) -> Result<Value> {
    let params = params_or_empty(params);
    let filename = require_string_field(&params, "filename")?;
    if filename.contains('/') || filename.contains("..") {
        return Err(AppError::InvalidParams("filename must be a single path component".to_string()));
    }
    let path = std::path::Path::new(&ctx.config.mediamtx.recordings_path).join(&filename);
    fs::remove_file(&path).await.map_err(|_| AppError::NotFound(filename.clone()))?;
    Ok(json!({ "deleted": filename }))
}

pub async fn get_metrics(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    let health = ctx.health.snapshot();
    Ok(json!({
        "events_filtered": ctx.discovery.events_filtered(),
        "circuit_breaker_activations": health.circuit_breaker_activations,
        "recovery_count": health.recovery_count,
    }))
}

pub async fn get_status(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    let health = ctx.health.snapshot();
    let status = match health.status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::CircuitOpen => "circuit_open",
        HealthStatus::Recovering => "recovering",
    };
    Ok(json!({ "status": status }))
}

pub async fn get_server_info(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
    }))
}

async fn directory_size(dir: &str) -> u64 {
    let mut total = 0u64;
    if let Ok(mut read_dir) = fs::read_dir(dir).await {
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Ok(metadata) = entry.metadata().await {
                total += metadata.len();
            }
        }
    }
    total
}

pub async fn get_storage_info(ctx: Arc<RpcContext>, _principal: Option<Principal>, _params: Value) -> Result<Value> {
    let recordings_bytes = directory_size(&ctx.config.mediamtx.recordings_path).await;
    let snapshots_bytes = directory_size(&ctx.config.mediamtx.snapshots_path).await;
    Ok(json!({
        "recordings_bytes": recordings_bytes,
        "snapshots_bytes": snapshots_bytes,
    }))
}

/// Used by the orchestrator, not registered as an RPC method: resolves a
/// device's effective capability into the notification metadata fields
/// (§4.I "Enhanced metadata derivation").
pub async fn capability_status_to_metadata(status: CapabilityStatus) -> Value {
    match status {
        CapabilityStatus::Available(capability) => {
            let source = match capability.source {
                crate::discovery::CapabilitySource::Confirmed => "confirmed_capability",
                crate::discovery::CapabilitySource::Provisional => "provisional_capability",
            };
            let validation = match capability.source {
                crate::discovery::CapabilitySource::Confirmed => "confirmed",
                crate::discovery::CapabilitySource::Provisional => "provisional",
            };
            json!({
                "metadata_source": source,
                "metadata_validation": validation,
                "metadata_confirmed": matches!(capability.source, crate::discovery::CapabilitySource::Confirmed),
                "metadata_provisional": matches!(capability.source, crate::discovery::CapabilitySource::Provisional),
                "resolution": capability.resolutions.first().cloned().unwrap_or_else(|| "1920x1080".to_string()),
                "fps": capability.frame_rates.first().cloned().unwrap_or_else(|| "30".to_string()),
            })
        }
        CapabilityStatus::Error => json!({
            "metadata_source": "default",
            "metadata_validation": "error",
            "metadata_confirmed": false,
            "metadata_provisional": false,
            "resolution": "1920x1080",
            "fps": 30,
        }),
        CapabilityStatus::Unknown => json!({
            "metadata_source": "default",
            "metadata_validation": "none",
            "metadata_confirmed": false,
            "metadata_provisional": false,
            "resolution": "1920x1080",
            "fps": 30,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_id_parsed_from_standard_device_path() {
        assert_eq!(camera_id_from_device("/dev/video3").unwrap(), 3);
    }

    #[test]
    fn camera_id_rejects_paths_without_a_trailing_number() {
        assert!(camera_id_from_device("/dev/video").is_err());
    }
}
