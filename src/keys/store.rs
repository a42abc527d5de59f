//! JSON-file backed key store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ApiKeyData, KeyRejection, KeyStore, Tier, ValidatedKey, current_month, preview};
use crate::config::TierLimits;
use crate::{Error, Result};

/// Key store persisted as a single JSON object (`key -> ApiKeyData`).
///
/// Every read-modify-write happens under one mutex, and the file is replaced
/// atomically (temp file + rename) after each mutation.
pub struct JsonKeyStore {
    path: Option<PathBuf>,
    limits: TierLimits,
    keys: Mutex<HashMap<String, ApiKeyData>>,
}

impl JsonKeyStore {
    /// Open the store at `path`. A missing file starts an empty store.
    pub async fn open(path: impl Into<PathBuf>, limits: TierLimits) -> Result<Self> {
        let path = path.into();
        let keys = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::KeyStore(format!("Corrupt key file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), keys = keys.len(), "Opened key store");
        Ok(Self {
            path: Some(path),
            limits,
            keys: Mutex::new(keys),
        })
    }

    /// Store that lives only in memory.
    #[must_use]
    pub fn in_memory(limits: TierLimits) -> Self {
        Self {
            path: None,
            limits,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Insert (or replace) a key record under an explicit key value.
    pub async fn insert(&self, key: impl Into<String>, data: ApiKeyData) -> Result<()> {
        let mut keys = self.keys.lock().await;
        keys.insert(key.into(), data);
        self.persist(&keys).await
    }

    /// Create a new key for `name` at `tier` and return the generated value.
    pub async fn create_key(&self, name: &str, tier: Tier) -> Result<String> {
        if tier == Tier::Discovery {
            return Err(Error::KeyStore(
                "the discovery tier cannot be assigned to a key".to_string(),
            ));
        }
        let key = generate_key();
        self.insert(key.clone(), ApiKeyData::new(name, tier)).await?;
        info!(key = %preview(&key), name, %tier, "Created API key");
        Ok(key)
    }

    /// All keys, sorted by creation time.
    pub async fn list(&self) -> Vec<(String, ApiKeyData)> {
        let keys = self.keys.lock().await;
        let mut all: Vec<_> = keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        all
    }

    /// Activate or deactivate a key.
    pub async fn set_active(&self, key: &str, active: bool) -> Result<()> {
        self.update(key, |data| data.active = active).await
    }

    /// Move a key to another tier.
    pub async fn set_tier(&self, key: &str, tier: Tier) -> Result<()> {
        if tier == Tier::Discovery {
            return Err(Error::KeyStore(
                "the discovery tier cannot be assigned to a key".to_string(),
            ));
        }
        self.update(key, |data| data.tier = tier).await
    }

    /// Current-month usage for a key, if it exists.
    pub async fn usage(&self, key: &str) -> Option<u64> {
        self.keys.lock().await.get(key).map(ApiKeyData::current_usage)
    }

    /// Limits this store enforces.
    #[must_use]
    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    async fn update(&self, key: &str, f: impl FnOnce(&mut ApiKeyData)) -> Result<()> {
        let mut keys = self.keys.lock().await;
        let data = keys
            .get_mut(key)
            .ok_or_else(|| Error::KeyStore(format!("Unknown API key {}", preview(key))))?;
        f(data);
        self.persist(&keys).await
    }

    async fn persist(&self, keys: &HashMap<String, ApiKeyData>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(keys)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Persisted key store");
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyStore for JsonKeyStore {
    async fn validate(&self, key: &str) -> std::result::Result<ValidatedKey, KeyRejection> {
        let keys = self.keys.lock().await;
        let data = keys.get(key).ok_or(KeyRejection::Invalid)?;
        if !data.active {
            return Err(KeyRejection::Deactivated);
        }
        let limit = self.limits.for_tier(data.tier).monthly_limit;
        if limit > 0 && data.current_usage() >= limit {
            return Err(KeyRejection::MonthlyLimit {
                limit,
                tier: data.tier,
            });
        }
        Ok(ValidatedKey {
            name: data.name.clone(),
            tier: data.tier,
        })
    }

    async fn record_usage(&self, key: &str) -> Result<u64> {
        let mut keys = self.keys.lock().await;
        let month = current_month();
        let data = keys.get_mut(key).ok_or(KeyRejection::Invalid)?;
        if !data.active {
            return Err(KeyRejection::Deactivated.into());
        }
        // Re-checked under the lock: concurrent callers may all have passed `validate`
        let limit = self.limits.for_tier(data.tier).monthly_limit;
        let count = data.usage.entry(month.clone()).or_insert(0);
        if limit > 0 && *count >= limit {
            return Err(KeyRejection::MonthlyLimit {
                limit,
                tier: data.tier,
            }
            .into());
        }
        *count += 1;
        let count = *count;

        if let Err(e) = self.persist(&keys).await {
            if let Some(c) = keys.get_mut(key).and_then(|d| d.usage.get_mut(&month)) {
                *c -= 1;
            }
            return Err(e);
        }
        debug!(key = %preview(key), count, "Recorded usage");
        Ok(count)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Generate a new API key: `sk_live_` followed by 48 hex characters.
#[must_use]
pub fn generate_key() -> String {
    let bytes: [u8; 24] = rand::random();
    format!("sk_live_{}", hex::encode(bytes))
}
