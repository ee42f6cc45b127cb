//! File/Artifact Endpoints (§4.J).
//!
//! A second HTTP surface, separate from the JSON-RPC control channel
//! (§6), serving recorded/snapshotted media and liveness/readiness probes.
//! Authorization reuses the same [`crate::auth::Authenticator`] as the
//! control channel via a bearer token, so a client never needs two
//! separate credentials.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{AuthMode, Role};
use crate::health::HealthStatus;
use crate::rpc::context::RpcContext;

pub fn router(ctx: Arc<RpcContext>) -> Router {
    Router::new()
        .route("/files/recordings/:name", get(serve_recording))
        .route("/files/snapshots/:name", get(serve_snapshot))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Authorizes a file request against the minimum role every file-listing
/// RPC method requires (§4.H table: `list_recordings`/`list_snapshots`
/// are Viewer-gated, so file retrieval is held to the same bar).
async fn authorize(ctx: &RpcContext, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(token) = bearer_token(headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let result = ctx.authenticator.authenticate(token, AuthMode::Auto).await;
    match result.principal {
        Some(principal) if principal.role.has_permission(Role::Viewer) => Ok(()),
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Rejects any filename with a path separator or `..` component, the same
/// single-path-component discipline as [`crate::rpc::methods`]'s file
/// handlers.
fn safe_join(dir: &str, filename: &str) -> Option<PathBuf> {
    if filename.is_empty() || filename.contains('/') || filename.contains("..") {
        return None;
    }
    Some(FsPath::new(dir).join(filename))
}

async fn serve_file(dir: &str, filename: &str) -> Response {
    let Some(path) = safe_join(dir, filename) else {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    };

    match File::open(&path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            Body::from_stream(stream).into_response()
        }
        Err(err) => {
            warn!(file = %filename, error = %err, "requested artifact not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn serve_recording(State(ctx): State<Arc<RpcContext>>, headers: HeaderMap, Path(name): Path<String>) -> Response {
    if let Err(status) = authorize(&ctx, &headers).await {
        return status.into_response();
    }
    serve_file(&ctx.config.mediamtx.recordings_path, &name).await
}

async fn serve_snapshot(State(ctx): State<Arc<RpcContext>>, headers: HeaderMap, Path(name): Path<String>) -> Response {
    if let Err(status) = authorize(&ctx, &headers).await {
        return status.into_response();
    }
    serve_file(&ctx.config.mediamtx.snapshots_path, &name).await
}

/// Liveness: the process is up and able to answer HTTP at all. Never
/// reflects upstream MediaMTX health (§4.J "liveness means this process,
/// not its dependencies").
async fn health_live() -> impl IntoResponse {
    Json(json!({ "status": "live" }))
}

/// Readiness: an open circuit breaker means the service cannot usefully
/// serve camera traffic even though the process itself is alive.
async fn health_ready(State(ctx): State<Arc<RpcContext>>) -> Response {
    let snapshot = ctx.health.snapshot();
    match snapshot.status {
        HealthStatus::CircuitOpen => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not_ready" }))).into_response(),
        _ => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_traversal_and_separators() {
        assert!(safe_join("/var/recordings", "../etc/passwd").is_none());
        assert!(safe_join("/var/recordings", "a/b.mp4").is_none());
        assert!(safe_join("/var/recordings", "").is_none());
        assert_eq!(safe_join("/var/recordings", "cam0.mp4"), Some(PathBuf::from("/var/recordings/cam0.mp4")));
    }

    #[test]
    fn bearer_token_extracts_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_missing_or_malformed_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
