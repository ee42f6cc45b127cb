//! API key authentication and persisted key store (§3 `Credential`, §4.G,
//! §6 "Persisted state").
//!
//! Keys are stored as opaque SHA-256 hashes at rest; the plaintext key is
//! returned only at creation, grounded in `api_key_handler.py`'s
//! "don't store the original key" discipline but with an actual hash
//! comparison (constant-time, via `subtle`) rather than a placeholder.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{AuthMethod, Principal, Role};
use crate::error::{AppError, Result};

const KEY_LENGTH: usize = 32;
const STORE_VERSION: &str = "1.0";

/// One persisted API key record (§6: `{key_id, name, role, created_at,
/// expires_at?, last_used?, is_active}`). The plaintext key never appears
/// here — only its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    #[serde(skip_serializing, default)]
    key_hash: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key_id: String,
    key_hash: String,
    name: String,
    role: Role,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    is_active: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreDocument {
    version: String,
    updated_at: Option<DateTime<Utc>>,
    keys: Vec<StoredRecord>,
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn generate_key() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(KEY_LENGTH).map(char::from).collect()
}

/// Persisted, in-memory-cached API key store. Writes are atomic (write to a
/// temp file in the same directory, then rename).
pub struct ApiKeyStore {
    path: PathBuf,
    records: RwLock<Vec<StoredRecord>>,
}

impl ApiKeyStore {
    /// Load the store from `path`, creating an empty document if absent.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let data = tokio::fs::read(&path).await?;
            let doc: StoreDocument = serde_json::from_slice(&data).unwrap_or_default();
            doc.keys
        } else {
            Vec::new()
        };
        let store = Self {
            path,
            records: RwLock::new(records),
        };
        store.save().await?;
        Ok(store)
    }

    async fn save(&self) -> Result<()> {
        let records = self.records.read().await;
        let doc = StoreDocument {
            version: STORE_VERSION.to_string(),
            updated_at: Some(Utc::now()),
            keys: records.clone(),
        };
        drop(records);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(&self.path);
        let payload = serde_json::to_vec_pretty(&doc)?;
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Create a new key, returning the plaintext key (only time it's available).
    pub async fn create(&self, name: &str, role: Role, expires_in_days: Option<i64>) -> Result<String> {
        let key = generate_key();
        let now = Utc::now();
        let record = StoredRecord {
            key_id: Uuid::new_v4().to_string(),
            key_hash: hash_key(&key),
            name: name.to_string(),
            role,
            created_at: now,
            expires_at: expires_in_days.map(|days| now + Duration::days(days)),
            last_used: None,
            is_active: true,
        };
        self.records.write().await.push(record);
        self.save().await?;
        Ok(key)
    }

    /// Validate a presented key in constant time, marking it as used on success.
    pub async fn validate(&self, key: &str) -> Result<Principal> {
        if key.len() != KEY_LENGTH {
            return Err(AppError::AuthFailed("invalid api key".to_string()));
        }
        let candidate_hash = hash_key(key);
        let now = Utc::now();

        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.is_active && constant_time_eq(&r.key_hash, &candidate_hash))
            .ok_or_else(|| AppError::AuthFailed("invalid api key".to_string()))?;

        if let Some(expires_at) = record.expires_at {
            if expires_at < now {
                return Err(AppError::AuthFailed("api key expired".to_string()));
            }
        }

        record.last_used = Some(now);
        let principal = Principal {
            user_id: record.key_id.clone(),
            role: record.role,
            auth_method: AuthMethod::ApiKey,
            expires_at: record.expires_at.map(|e| e.timestamp()),
        };
        drop(records);
        self.save().await?;
        Ok(principal)
    }

    pub async fn revoke(&self, key_id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let found = records.iter_mut().find(|r| r.key_id == key_id);
        let revoked = if let Some(record) = found {
            record.is_active = false;
            true
        } else {
            false
        };
        drop(records);
        if revoked {
            self.save().await?;
        }
        Ok(revoked)
    }

    pub async fn list(&self) -> Vec<ApiKeyRecord> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| ApiKeyRecord {
                key_id: r.key_id.clone(),
                key_hash: String::new(),
                name: r.name.clone(),
                role: r.role,
                created_at: r.created_at,
                expires_at: r.expires_at,
                last_used: r.last_used,
                is_active: r.is_active,
            })
            .collect()
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_key_validates_and_updates_last_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap();
        let key = store.create("ci-bot", Role::Operator, None).await.unwrap();

        let principal = store.validate(&key).await.unwrap();
        assert_eq!(principal.role, Role::Operator);
        assert_eq!(principal.auth_method, AuthMethod::ApiKey);

        let records = store.list().await;
        assert!(records[0].last_used.is_some());
    }

    #[tokio::test]
    async fn wrong_length_key_is_rejected_without_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap();
        store.create("ci-bot", Role::Viewer, None).await.unwrap();
        assert!(store.validate("too-short").await.is_err());
    }

    #[tokio::test]
    async fn revoked_key_no_longer_validates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap();
        let key = store.create("ci-bot", Role::Viewer, None).await.unwrap();
        let key_id = store.list().await[0].key_id.clone();

        assert!(store.revoke(&key_id).await.unwrap());
        assert!(store.validate(&key).await.is_err());
    }

    #[tokio::test]
    async fn expired_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path().join("keys.json")).await.unwrap();
        let key = store.create("short-lived", Role::Viewer, Some(-1)).await.unwrap();
        assert!(store.validate(&key).await.is_err());
    }

    #[tokio::test]
    async fn store_persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let key = {
            let store = ApiKeyStore::load(&path).await.unwrap();
            store.create("persisted", Role::Admin, None).await.unwrap()
        };

        let reloaded = ApiKeyStore::load(&path).await.unwrap();
        assert!(reloaded.validate(&key).await.is_ok());
    }
}
