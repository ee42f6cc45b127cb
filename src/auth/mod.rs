//! Auth & Rate-Limit Middleware (§4.G).
//!
//! Two authentication modes feed a single [`Principal`]: HMAC-signed tokens
//! ([`token`]) and API keys ([`api_key`]). [`rate_limit`] implements the
//! per-client sliding window and [`registry`] the connection-admission /
//! auth-slot bookkeeping that binds a principal to a client for its entire
//! lifetime, per §3 `Client`.

pub mod api_key;
pub mod rate_limit;
pub mod registry;
pub mod token;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::api_key::ApiKeyStore;
use crate::auth::token::TokenAuthenticator;

/// Role hierarchy: `viewer < operator < admin` (§3 `Credential`, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "viewer" => Some(Role::Viewer),
            "operator" => Some(Role::Operator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }

    /// `self.has_permission(required)` — does this role satisfy `required`?
    pub fn has_permission(&self, required: Role) -> bool {
        *self >= required
    }
}

/// How a [`Principal`] was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Token,
    ApiKey,
}

/// An authenticated caller, bound to a client for its connection's lifetime
/// (§3 `Client`: "auth state is bound to the client for its entire lifetime
/// after successful authentication").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub auth_method: AuthMethod,
    /// Unix-epoch seconds; `None` for API keys with no expiry.
    pub expires_at: Option<i64>,
}

impl Principal {
    /// §8 universal invariant: "role check never passes for a client whose
    /// principal has `exp < now`".
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now_unix)
    }
}

/// Outcome of an authentication attempt. Failures never leak whether the
/// principal exists (§7 "Authorization").
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub auth_method: AuthMethod,
    pub principal: Option<Principal>,
    pub error_message: Option<String>,
}

impl AuthResult {
    pub fn success(auth_method: AuthMethod, principal: Principal) -> Self {
        Self {
            auth_method,
            principal: Some(principal),
            error_message: None,
        }
    }

    pub fn failure(auth_method: AuthMethod, message: impl Into<String>) -> Self {
        Self {
            auth_method,
            principal: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.principal.is_some()
    }
}

/// Requested authentication mode for a credential presented to `authenticate`
/// (§4.G "Authentication is *auto* unless the caller specifies a mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Auto,
    Token,
    ApiKey,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Auto
    }
}

/// Combines the two credential kinds behind the single entry point the
/// `authenticate` RPC method calls.
pub struct Authenticator {
    pub tokens: TokenAuthenticator,
    pub api_keys: Arc<ApiKeyStore>,
}

impl Authenticator {
    pub fn new(tokens: TokenAuthenticator, api_keys: Arc<ApiKeyStore>) -> Self {
        Self { tokens, api_keys }
    }

    /// Authenticate a presented credential under the requested mode. `auto`
    /// tries the token format first (it has a recognizable `.`-delimited
    /// shape) and falls back to an API key lookup.
    pub async fn authenticate(&self, credential: &str, mode: AuthMode) -> AuthResult {
        match mode {
            AuthMode::Token => self.authenticate_token(credential),
            AuthMode::ApiKey => self.authenticate_api_key(credential).await,
            AuthMode::Auto => {
                if credential.contains('.') {
                    let result = self.authenticate_token(credential);
                    if result.is_success() {
                        return result;
                    }
                }
                self.authenticate_api_key(credential).await
            }
        }
    }

    fn authenticate_token(&self, credential: &str) -> AuthResult {
        match self.tokens.validate(credential) {
            Ok(principal) => AuthResult::success(AuthMethod::Token, principal),
            Err(message) => AuthResult::failure(AuthMethod::Token, message),
        }
    }

    async fn authenticate_api_key(&self, credential: &str) -> AuthResult {
        match self.api_keys.validate(credential).await {
            Ok(principal) => AuthResult::success(AuthMethod::ApiKey, principal),
            Err(err) => AuthResult::failure(AuthMethod::ApiKey, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy_orders_as_spec_requires() {
        assert!(Role::Admin.has_permission(Role::Viewer));
        assert!(Role::Admin.has_permission(Role::Operator));
        assert!(Role::Operator.has_permission(Role::Viewer));
        assert!(!Role::Viewer.has_permission(Role::Operator));
        assert!(!Role::Operator.has_permission(Role::Admin));
    }

    #[test]
    fn expired_principal_is_detected() {
        let principal = Principal {
            user_id: "u1".to_string(),
            role: Role::Admin,
            auth_method: AuthMethod::Token,
            expires_at: Some(100),
        };
        assert!(principal.is_expired(200));
        assert!(!principal.is_expired(50));
    }

    #[test]
    fn principal_with_no_expiry_never_expires() {
        let principal = Principal {
            user_id: "u1".to_string(),
            role: Role::Viewer,
            auth_method: AuthMethod::ApiKey,
            expires_at: None,
        };
        assert!(!principal.is_expired(i64::MAX));
    }

    #[tokio::test]
    async fn auto_mode_falls_back_to_api_key_when_not_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let api_keys = Arc::new(api_key::ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap());
        let key = api_keys.create("ci-bot", Role::Operator, None).await.unwrap();
        let authenticator = Authenticator::new(token::TokenAuthenticator::new("secret"), api_keys);

        let result = authenticator.authenticate(&key, AuthMode::Auto).await;
        assert!(result.is_success());
        assert_eq!(result.auth_method, AuthMethod::ApiKey);
    }

    #[tokio::test]
    async fn auto_mode_accepts_a_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let api_keys = Arc::new(api_key::ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap());
        let tokens = token::TokenAuthenticator::new("secret");
        let token = tokens.generate("alice", Role::Admin, 24);
        let authenticator = Authenticator::new(tokens, api_keys);

        let result = authenticator.authenticate(&token, AuthMode::Auto).await;
        assert!(result.is_success());
        assert_eq!(result.auth_method, AuthMethod::Token);
    }
}
