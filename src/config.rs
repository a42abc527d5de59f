//! Configuration management

use std::{path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::keys::Tier;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the server starts.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth bridge configuration
    pub oauth: OAuthConfig,
    /// API key store configuration
    pub keys: KeysConfig,
    /// Tool configuration
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // INSIGHTS_GATEWAY_SERVER__PORT=8080 -> server.port
        figment = figment.merge(Env::prefixed("INSIGHTS_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Replace a leading `~` with the user's home directory.
fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL (issuer). Derived from the `Host` header when unset.
    pub public_url: Option<String>,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Maximum number of concurrently open tool sessions
    pub max_sessions: usize,
    /// Keep-alive interval for session notification streams
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_url: None,
            max_body_size: 1024 * 1024,
            max_sessions: 1000,
            keep_alive_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Base URL used when no `public_url` is set and the request carries no `Host`.
    #[must_use]
    pub fn fallback_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// OAuth bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Lifetime of an issued authorization code
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
    /// How often expired authorization codes are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Advisory `expires_in` returned by the token endpoint (seconds)
    pub token_expires_in: u64,
    /// Scope granted when the client asks for none
    pub default_scope: String,
    /// Reject `/authorize` when a registered client uses an unregistered redirect URI
    pub strict_redirect_uris: bool,
    /// Require `redirect_uri` on the token request whenever the code recorded one
    pub require_token_redirect_uri: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            token_expires_in: 86_400,
            default_scope: "mcp:tools".to_string(),
            strict_redirect_uris: false,
            require_token_redirect_uri: false,
        }
    }
}

/// API key store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// JSON file holding the API keys. `None` keeps keys in memory only.
    pub path: Option<PathBuf>,
    /// Per-tier limits
    pub tiers: TierLimits,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            path: dirs::home_dir().map(|home| home.join(".insights-gateway").join("keys.json")),
            tiers: TierLimits::default(),
        }
    }
}

/// Limits for every tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    /// Free tier
    pub free: TierLimit,
    /// Starter tier
    pub starter: TierLimit,
    /// Pro tier
    pub pro: TierLimit,
    /// Business tier
    pub business: TierLimit,
}

impl TierLimits {
    /// Limits for a tier. The synthetic discovery tier is unlimited.
    #[must_use]
    pub fn for_tier(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Free => self.free,
            Tier::Starter => self.starter,
            Tier::Pro => self.pro,
            Tier::Business => self.business,
            Tier::Discovery => TierLimit {
                monthly_limit: 0,
                per_minute: 0,
            },
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free: TierLimit { monthly_limit: 100, per_minute: 10 },
            starter: TierLimit { monthly_limit: 1_000, per_minute: 30 },
            pro: TierLimit { monthly_limit: 10_000, per_minute: 60 },
            business: TierLimit { monthly_limit: 100_000, per_minute: 120 },
        }
    }
}

/// Limits for a single tier (0 = unlimited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    /// Requests allowed per calendar month
    pub monthly_limit: u64,
    /// Requests allowed per minute
    pub per_minute: u32,
}

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Timeout for outbound page fetches
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// User agent sent with outbound page fetches
    pub user_agent: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            user_agent: concat!("insights-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
