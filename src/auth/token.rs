//! HMAC-signed token authentication (§4.G "Signed tokens").
//!
//! Tokens are `base64url(claims_json).hex(hmac_sha256(secret, claims_json))`.
//! This mirrors `jwt_handler.py`'s HS256 usage without pulling in a full JWT
//! crate's claim-registry/alg-negotiation surface the spec doesn't need —
//! the wire format is a closed two-part string, not standard JWT compact
//! serialization, so a confused client can't downgrade the algorithm.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::auth::{AuthMethod, Principal, Role};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    role: String,
    iat: i64,
    exp: i64,
}

/// Issues and validates HMAC-signed tokens against a shared secret.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: String,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn sign(&self, payload_b64: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Generate a token for `user_id`/`role`, expiring `expiry_hours` from now.
    pub fn generate(&self, user_id: &str, role: Role, expiry_hours: i64) -> String {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            role: role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
        };
        let payload = serde_json::to_vec(&claims).expect("Claims always serializes");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let signature = self.sign(&payload_b64);
        format!("{payload_b64}.{signature}")
    }

    /// Validate a token's signature, required claim fields, role membership,
    /// and expiry (§4.G). Never panics on malformed input.
    pub fn validate(&self, token: &str) -> Result<Principal, String> {
        let (payload_b64, signature) = token.split_once('.').ok_or("malformed token")?;

        let expected = self.sign(payload_b64);
        if !constant_time_eq_str(&expected, signature) {
            return Err("signature mismatch".to_string());
        }

        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| "invalid token encoding".to_string())?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| "invalid token claims".to_string())?;

        let role = Role::parse(&claims.role).ok_or_else(|| format!("invalid role '{}'", claims.role))?;

        if claims.exp < Utc::now().timestamp() {
            return Err("token expired".to_string());
        }

        Ok(Principal {
            user_id: claims.user_id,
            role,
            auth_method: AuthMethod::Token,
            expires_at: Some(claims.exp),
        })
    }
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_token_validates_with_correct_claims() {
        let auth = TokenAuthenticator::new("s3cret");
        let token = auth.generate("alice", Role::Operator, 24);
        let principal = auth.validate(&token).unwrap();
        assert_eq!(principal.user_id, "alice");
        assert_eq!(principal.role, Role::Operator);
        assert_eq!(principal.auth_method, AuthMethod::Token);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let auth = TokenAuthenticator::new("s3cret");
        let token = auth.generate("alice", Role::Viewer, 24);
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(auth.validate(&tampered).is_err());
    }

    #[test]
    fn token_signed_with_different_secret_is_rejected() {
        let issuer = TokenAuthenticator::new("secret-a");
        let verifier = TokenAuthenticator::new("secret-b");
        let token = issuer.generate("alice", Role::Admin, 24);
        assert!(verifier.validate(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = TokenAuthenticator::new("s3cret");
        let token = auth.generate("alice", Role::Viewer, -1);
        assert!(auth.validate(&token).is_err());
    }

    #[test]
    fn malformed_token_never_panics() {
        let auth = TokenAuthenticator::new("s3cret");
        assert!(auth.validate("not-a-token").is_err());
        assert!(auth.validate("").is_err());
    }
}
