//! Credential handling for the protocol endpoint
//!
//! - Credential extraction (headers, query string, bearer token)
//! - Key validation through the [`KeyStore`]
//! - Per-key, per-minute rate limiting sized from the key's tier
//! - Discovery bypass for side-effect-free protocol methods

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TierLimits;
use crate::error::rpc_codes;
use crate::keys::{KeyRejection, KeyStore, Tier, ValidatedKey, preview};
use crate::oauth::metadata::resource_metadata_url;

/// Type alias for our rate limiter
type KeyRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Protocol methods that may be called without a credential.
pub const DISCOVERY_METHODS: &[&str] = &["initialize", "tools/list", "notifications/initialized"];

/// Query parameter spellings accepted for the credential, in precedence order.
const QUERY_KEYS: &[&str] = &["api_key", "apiKey", "key"];

/// `true` for methods covered by the discovery bypass.
#[must_use]
pub fn is_discovery_method(method: &str) -> bool {
    DISCOVERY_METHODS.contains(&method)
}

/// Pull the caller's credential out of a request.
///
/// Precedence: `x-api-key` header, `api-key` header, `api_key` / `apiKey` /
/// `key` query parameters, then `Authorization: Bearer`. First non-empty wins.
#[must_use]
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };

    if let Some(key) = header_value("x-api-key").or_else(|| header_value("api-key")) {
        return Some(key);
    }

    if let Some(query) = uri.query() {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        for name in QUERY_KEYS {
            if let Some((_, value)) = pairs
                .iter()
                .find(|(k, v)| k == name && !v.trim().is_empty())
            {
                return Some(value.trim().to_string());
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Who is making a protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Presented a key that validated
    Key {
        /// The raw credential
        key: String,
        /// What the store said about it
        validated: ValidatedKey,
    },
    /// No credential, discovery method only
    Discovery,
}

impl Caller {
    /// The raw credential, if any
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key { key, .. } => Some(key),
            Self::Discovery => None,
        }
    }

    /// Tier the request is served at
    #[must_use]
    pub fn tier(&self) -> Tier {
        match self {
            Self::Key { validated, .. } => validated.tier,
            Self::Discovery => Tier::Discovery,
        }
    }
}

/// Why a protocol request was refused before reaching a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    /// No credential on a non-discovery call
    Missing,
    /// Key store refused the credential
    Rejected(KeyRejection),
    /// Per-minute limit exhausted
    RateLimited(Tier),
}

impl AuthRejection {
    /// Convert to an HTTP response. `base_url` feeds the `WWW-Authenticate` challenge.
    #[must_use]
    pub fn into_response(self, base_url: &str) -> Response {
        match self {
            Self::Missing => unauthorized_response(
                "API key required. Authenticate via OAuth or pass x-api-key, api_key or Authorization: Bearer",
                base_url,
            ),
            Self::Rejected(reason) => unauthorized_response(&reason.to_string(), base_url),
            Self::RateLimited(tier) => rate_limited_response(tier),
        }
    }
}

/// Validates credentials and applies per-minute limits.
pub struct Authenticator {
    keys: Arc<dyn KeyStore>,
    limits: TierLimits,
    /// Rate limiters per key, tagged with the tier they were sized for
    rate_limiters: DashMap<String, (Tier, Arc<KeyRateLimiter>)>,
}

impl Authenticator {
    /// Build an authenticator over a key store
    #[must_use]
    pub fn new(keys: Arc<dyn KeyStore>, limits: TierLimits) -> Self {
        Self {
            keys,
            limits,
            rate_limiters: DashMap::new(),
        }
    }

    /// Resolve the caller for a request.
    ///
    /// `method` is the JSON-RPC method, used for the discovery bypass.
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        method: Option<&str>,
    ) -> Result<Caller, AuthRejection> {
        let Some(key) = credential else {
            if method.is_some_and(is_discovery_method) {
                debug!(method = method.unwrap_or_default(), "Discovery call without credential");
                return Ok(Caller::Discovery);
            }
            warn!(method = method.unwrap_or("-"), "Missing credential");
            return Err(AuthRejection::Missing);
        };

        let validated = self.keys.validate(key).await.map_err(|reason| {
            warn!(key = %preview(key), reason = %reason, "Credential rejected");
            AuthRejection::Rejected(reason)
        })?;

        if !self.check_rate_limit(key, validated.tier) {
            warn!(key = %preview(key), tier = %validated.tier, "Rate limit exceeded");
            return Err(AuthRejection::RateLimited(validated.tier));
        }

        Ok(Caller::Key {
            key: key.to_string(),
            validated,
        })
    }

    /// Check rate limit for a key. Returns true if allowed, false if rate limited.
    #[must_use]
    pub fn check_rate_limit(&self, key: &str, tier: Tier) -> bool {
        let Some(per_minute) = NonZeroU32::new(self.limits.for_tier(tier).per_minute) else {
            // 0 = unlimited
            return true;
        };

        let limiter = {
            let mut entry = self
                .rate_limiters
                .entry(key.to_string())
                .or_insert_with(|| (tier, Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))));
            if entry.0 != tier {
                *entry = (tier, Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))));
            }
            Arc::clone(&entry.1)
        };
        limiter.check().is_ok()
    }
}

/// Create a 401 Unauthorized response
#[must_use]
pub fn unauthorized_response(message: &str, base_url: &str) -> Response {
    let challenge = format!(
        r#"Bearer realm="mcp", resource_metadata="{}""#,
        resource_metadata_url(base_url)
    );
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::UNAUTHORIZED,
                "message": message
            },
            "id": null
        })),
    )
        .into_response()
}

/// Create a 429 Rate Limited response
#[must_use]
pub fn rate_limited_response(tier: Tier) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "60")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::SERVER_ERROR_START,
                "message": format!("Rate limit exceeded for the {tier} tier. Try again later.")
            },
            "id": null
        })),
    )
        .into_response()
}
