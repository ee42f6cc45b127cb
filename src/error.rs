//! Crate-wide structured error type.
//!
//! Unlike a REST surface, this daemon's primary error boundary is JSON-RPC: every
//! `AppError` that escapes a handler is converted to a numbered RPC error object
//! (§4.H) rather than an HTTP status. `rpc_code`/`rpc_message` do that conversion;
//! the file/health HTTP surface (§4.J) maps the same errors to plain status codes
//! via its own small match in `files::mod`.

use thiserror::Error;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error("insufficient permissions: requires {required} role")]
    Forbidden { required: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("connection limit reached")]
    ConnectionLimitReached,

    #[error("upstream operation failed: {0}")]
    UpstreamFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl AppError {
    /// JSON-RPC numeric error code for this error, per §4.H's table.
    pub fn rpc_code(&self) -> i64 {
        match self {
            AppError::AuthFailed(_) | AppError::Unauthorized => -32001,
            AppError::Forbidden { .. } | AppError::RateLimited => -32003,
            AppError::NotFound(_) => -32602,
            AppError::InvalidRequest(_) => -32600,
            AppError::InvalidParams(_) => -32602,
            AppError::ConnectionLimitReached => -32003,
            AppError::UpstreamFailed(_) => -1003,
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Http(_)
            | AppError::Internal(_)
            | AppError::Fatal(_) => -32603,
        }
    }

    /// Human-readable message safe to return to an RPC caller. Authorization
    /// failures never leak whether a principal exists (§7 "Authorization").
    pub fn rpc_message(&self) -> String {
        match self {
            AppError::Unauthorized => "authentication required".to_string(),
            AppError::AuthFailed(_) => "authentication failed".to_string(),
            AppError::Forbidden { required } => format!("insufficient permissions: requires {required} role"),
            _ => self.to_string(),
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
