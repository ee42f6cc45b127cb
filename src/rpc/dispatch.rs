//! Dispatch pipeline (§4.H "Dispatch pipeline").
//!
//! Six ordered stages: JSON parse, envelope validation, authentication,
//! role check, rate limiting, handler invocation. Each stage can short-
//! circuit with its numbered RPC error; notifications (`id` absent) never
//! receive a response regardless of outcome.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info_span, Instrument};

use crate::auth::Principal;
use crate::rpc::context::RpcContext;
use crate::rpc::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, AUTH_REQUIRED, FORBIDDEN, INTERNAL_ERROR, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::rpc::registry::MethodRegistry;

fn short_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Dispatch one raw text frame. Returns `None` when nothing should be sent
/// back to the client (a notification, or a notification that failed).
pub async fn dispatch_frame(
    ctx: &Arc<RpcContext>,
    registry: &MethodRegistry,
    client_id: &str,
    principal: &mut Option<Principal>,
    text: &str,
) -> Option<String> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Some(respond(Value::Null, Err(JsonRpcError::new(PARSE_ERROR, "invalid JSON")))),
    };

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(_) => return Some(respond(Value::Null, Err(JsonRpcError::new(INVALID_REQUEST, "malformed request envelope")))),
    };

    let id = request.id.clone().unwrap_or(Value::Null);
    let is_notification = request.is_notification();

    if !request.is_well_formed() {
        return if is_notification {
            None
        } else {
            Some(respond(id, Err(JsonRpcError::new(INVALID_REQUEST, "malformed request envelope"))))
        };
    }

    let correlation_id = request.id.as_ref().map(|v| v.to_string()).unwrap_or_else(short_correlation_id);
    let span = info_span!("rpc_dispatch", method = %request.method, client = %client_id, correlation_id = %correlation_id);

    let outcome = run_pipeline(ctx, registry, client_id, principal, &request).instrument(span).await;
    match outcome {
        Ok(result) if is_notification => {
            let _ = result;
            None
        }
        Ok(result) => Some(respond(id, Ok(result))),
        Err(rpc_error) if is_notification => {
            error!(code = rpc_error.code, message = %rpc_error.message, "notification handling failed");
            None
        }
        Err(rpc_error) => Some(respond(id, Err(rpc_error))),
    }
}

async fn run_pipeline(
    ctx: &Arc<RpcContext>,
    registry: &MethodRegistry,
    client_id: &str,
    principal: &mut Option<Principal>,
    request: &JsonRpcRequest,
) -> Result<Value, JsonRpcError> {
    let entry = registry
        .get(&request.method)
        .ok_or_else(|| JsonRpcError::new(METHOD_NOT_FOUND, format!("method '{}' not found", request.method)))?
        .clone();

    if request.method != "authenticate" {
        if entry.min_role.is_some() {
            let now = chrono::Utc::now().timestamp();
            match principal {
                Some(p) if !p.is_expired(now) => {}
                _ => return Err(JsonRpcError::new(AUTH_REQUIRED, "authentication required")),
            }
        }

        if let Some(required) = entry.min_role {
            let role = principal.as_ref().map(|p| p.role);
            match role {
                Some(role) if role.has_permission(required) => {}
                _ => {
                    return Err(JsonRpcError::new(
                        FORBIDDEN,
                        format!("insufficient permissions: requires {} role", required.as_str()),
                    ))
                }
            }
        }

        if !ctx.rate_limiter.check(client_id).await {
            return Err(JsonRpcError::new(FORBIDDEN, "rate limit exceeded"));
        }
    }

    let params = request.params.clone().unwrap_or(Value::Null);
    let result = (entry.handler)(ctx.clone(), principal.clone(), params)
        .await
        .map_err(|err| JsonRpcError::new(err.rpc_code(), err.rpc_message()))?;

    if request.method == "authenticate" {
        if let Ok(new_principal) = serde_json::from_value::<Principal>(result.clone()) {
            *principal = Some(new_principal);
        } else {
            return Err(JsonRpcError::new(INTERNAL_ERROR, "authenticate handler returned a malformed principal"));
        }
    }

    Ok(result)
}

fn respond(id: Value, outcome: Result<Value, JsonRpcError>) -> String {
    let response = match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    };
    serde_json::to_string(&response).unwrap_or_else(|_| {
        serde_json::to_string(&JsonRpcResponse::failure(
            Value::Null,
            JsonRpcError::new(INTERNAL_ERROR, "failed to serialize response"),
        ))
        .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_key::ApiKeyStore;
    use crate::auth::token::TokenAuthenticator;
    use crate::auth::{Authenticator, Role};
    use crate::config::AppConfig;
    use crate::discovery::HybridDiscoveryMonitor;
    use crate::health::HealthSupervisor;
    use crate::mediamtx::MediaMtxClient;
    use crate::path_manager::PathManager;
    use crate::recording::RecordingDriver;
    use std::path::PathBuf;
    use std::time::Instant;
    use tokio::sync::broadcast;

    async fn test_context() -> Arc<RpcContext> {
        test_context_with_rpm(AppConfig::default().security.requests_per_minute).await
    }

    async fn test_context_with_rpm(requests_per_minute: u32) -> Arc<RpcContext> {
        let mut config = AppConfig::default();
        config.security.requests_per_minute = requests_per_minute;
        let dir = tempfile::tempdir().unwrap();
        let api_keys = Arc::new(ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap());
        let tokens = TokenAuthenticator::new("test-secret");
        let authenticator = Arc::new(Authenticator::new(tokens, api_keys));
        let mediamtx = Arc::new(MediaMtxClient::new(&config.mediamtx).unwrap());
        let (tx, _rx) = broadcast::channel(16);

        Arc::new(RpcContext {
            rate_limiter: Arc::new(crate::auth::rate_limit::RateLimiter::new(
                std::time::Duration::from_secs(config.security.rate_limit_window_secs),
                config.security.requests_per_minute,
            )),
            admission: Arc::new(crate::auth::registry::ConnectionAdmission::new(config.server.max_connections)),
            discovery: Arc::new(HybridDiscoveryMonitor::new(config.camera.clone())),
            path_manager: Arc::new(PathManager::new(mediamtx.clone())),
            recording: Arc::new(RecordingDriver::new(mediamtx.clone(), "ffmpeg", PathBuf::from("/tmp/rec"), PathBuf::from("/tmp/snap"))),
            health: Arc::new(HealthSupervisor::new(&config.mediamtx)),
            mediamtx,
            authenticator,
            notifier: tx,
            started_at: Instant::now(),
            config,
        })
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let ctx = test_context().await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let mut principal = Some(Principal {
            user_id: "u".to_string(),
            role: Role::Admin,
            auth_method: crate::auth::AuthMethod::Token,
            expires_at: None,
        });

        let response = dispatch_frame(&ctx, &registry, "c1", &mut principal, r#"{"jsonrpc":"2.0","id":1,"method":"bogus"}"#)
            .await
            .unwrap();
        assert!(response.contains("-32601"));
    }

    #[tokio::test]
    async fn viewer_calling_admin_method_is_forbidden() {
        let ctx = test_context().await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let mut principal = Some(Principal {
            user_id: "u".to_string(),
            role: Role::Viewer,
            auth_method: crate::auth::AuthMethod::Token,
            expires_at: None,
        });

        let response = dispatch_frame(&ctx, &registry, "c1", &mut principal, r#"{"jsonrpc":"2.0","id":1,"method":"get_metrics"}"#)
            .await
            .unwrap();
        assert!(response.contains("-32003"));
        assert!(response.to_lowercase().contains("admin"));
    }

    #[tokio::test]
    async fn viewer_calling_viewer_method_succeeds() {
        let ctx = test_context().await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let mut principal = Some(Principal {
            user_id: "u".to_string(),
            role: Role::Viewer,
            auth_method: crate::auth::AuthMethod::Token,
            expires_at: None,
        });

        let response = dispatch_frame(&ctx, &registry, "c1", &mut principal, r#"{"jsonrpc":"2.0","id":1,"method":"get_camera_list"}"#)
            .await
            .unwrap();
        assert!(response.contains("\"cameras\""));
    }

    #[tokio::test]
    async fn unauthenticated_call_to_protected_method_requires_auth() {
        let ctx = test_context().await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let mut principal = None;

        let response = dispatch_frame(&ctx, &registry, "c1", &mut principal, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();
        assert!(response.contains("-32001"));
    }

    #[tokio::test]
    async fn notification_without_id_receives_no_response() {
        let ctx = test_context().await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let mut principal = None;

        let response = dispatch_frame(&ctx, &registry, "c1", &mut principal, r#"{"jsonrpc":"2.0","method":"ping"}"#).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn rate_limit_is_keyed_by_client_not_principal() {
        // §3 "rate-limit window ... bound to the client": two connections
        // authenticated as the same principal must not share one window.
        let ctx = test_context_with_rpm(1).await;
        let mut registry = MethodRegistry::new();
        crate::rpc::register_builtin_methods(&mut registry);
        let principal = Some(Principal {
            user_id: "shared-user".to_string(),
            role: Role::Viewer,
            auth_method: crate::auth::AuthMethod::Token,
            expires_at: None,
        });

        let mut principal_a = principal.clone();
        let mut principal_b = principal;

        let first = dispatch_frame(&ctx, &registry, "client-a", &mut principal_a, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();
        assert!(first.contains("\"pong\""));

        // Same client again within the window: exhausted, rejected.
        let second = dispatch_frame(&ctx, &registry, "client-a", &mut principal_a, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .await
            .unwrap();
        assert!(second.contains("-32003"));

        // A different client id, same principal: gets its own window.
        let third = dispatch_frame(&ctx, &registry, "client-b", &mut principal_b, r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#)
            .await
            .unwrap();
        assert!(third.contains("\"pong\""));
    }
}
