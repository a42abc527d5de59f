//! API key store adapter.
//!
//! The gateway never looks inside the key file itself. Everything goes through
//! the [`KeyStore`] trait: `validate` answers "is this credential usable, and at
//! which tier", `record_usage` debits one unit from the current month.
//!
//! [`JsonKeyStore`] is the shipped implementation: a JSON file (or an in-memory
//! map) guarded by a single async mutex so concurrent debits never lose updates.

mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use store::JsonKeyStore;

use crate::Result;

/// Usage class bounding a key's monthly and per-minute request volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Free tier
    Free,
    /// Starter tier
    Starter,
    /// Pro tier
    Pro,
    /// Business tier
    Business,
    /// Synthetic tier for unauthenticated discovery calls. Never stored.
    Discovery,
}

impl Tier {
    /// Lowercase tier name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Business => "business",
            Self::Discovery => "discovery",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            other => Err(format!(
                "unknown tier '{other}' (expected free, starter, pro or business)"
            )),
        }
    }
}

/// Stored record for one API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyData {
    /// Human-readable owner name
    pub name: String,
    /// Usage tier
    pub tier: Tier,
    /// Deactivated keys fail validation
    #[serde(default = "default_active")]
    pub active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Requests per calendar month, keyed `YYYY-MM`
    #[serde(default)]
    pub usage: BTreeMap<String, u64>,
}

fn default_active() -> bool {
    true
}

impl ApiKeyData {
    /// New active key with no usage.
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            tier,
            active: true,
            created_at: Utc::now(),
            usage: BTreeMap::new(),
        }
    }

    /// Requests recorded for the current month.
    #[must_use]
    pub fn current_usage(&self) -> u64 {
        self.usage.get(&current_month()).copied().unwrap_or(0)
    }
}

/// A credential that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKey {
    /// Owner name
    pub name: String,
    /// Tier
    pub tier: Tier,
}

/// Why a credential was refused. The message is shown to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyRejection {
    /// Key not present in the store
    #[error("Invalid API key")]
    Invalid,
    /// Key exists but was deactivated
    #[error("API key has been deactivated")]
    Deactivated,
    /// Monthly quota exhausted
    #[error("Monthly limit of {limit} requests reached for the {tier} tier")]
    MonthlyLimit {
        /// Monthly request limit
        limit: u64,
        /// Tier of the key
        tier: Tier,
    },
}

/// Capability the gateway consumes to authenticate and meter callers.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Check a raw credential.
    async fn validate(&self, key: &str) -> std::result::Result<ValidatedKey, KeyRejection>;

    /// Debit one unit of usage from `key` for the current month.
    ///
    /// The quota is checked again as part of the debit, so callers racing past
    /// `validate` cannot overshoot it; a refusal is [`crate::Error::Rejected`].
    /// Returns the new monthly count.
    async fn record_usage(&self, key: &str) -> Result<u64>;
}

/// Month bucket used for usage counters (`YYYY-MM`, UTC).
#[must_use]
pub fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Short, log-safe preview of a secret.
#[must_use]
pub fn preview(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    format!("{head}...")
}
