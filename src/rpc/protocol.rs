//! JSON-RPC 2.0 envelope types and error codes (§4.H "Framing").

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const AUTH_REQUIRED: i64 = -32001;
pub const FORBIDDEN: i64 = -32003;
pub const UPSTREAM_FAILED: i64 = -1003;

/// A parsed request envelope. `id` is `None` for notifications (§4.H
/// "notifications omit `id`").
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// §4.H "a valid request object has `jsonrpc: "2.0"`, a string `method`".
    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc.as_deref() == Some("2.0") && !self.method.is_empty()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Responses carry exactly one of `result` or `error` (§4.H).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A server-originated, unsolicited message (§4.H "Notifications").
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_jsonrpc_field_is_malformed() {
        let req = JsonRpcRequest {
            jsonrpc: None,
            method: "ping".to_string(),
            params: None,
            id: Some(Value::from(1)),
        };
        assert!(!req.is_well_formed());
    }

    #[test]
    fn request_with_no_id_is_a_notification() {
        let req = JsonRpcRequest {
            jsonrpc: Some("2.0".to_string()),
            method: "ping".to_string(),
            params: None,
            id: None,
        };
        assert!(req.is_notification());
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let ok = JsonRpcResponse::success(Value::from(1), serde_json::json!({"pong": true}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = JsonRpcResponse::failure(Value::from(1), JsonRpcError::new(METHOD_NOT_FOUND, "no such method"));
        assert!(err.error.is_some() && err.result.is_none());
    }
}
