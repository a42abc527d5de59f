//! OAuth 2.0 bridge: authorization code + PKCE in front of API keys.
//!
//! Generic OAuth clients discover this server through the well-known metadata,
//! register dynamically, and send the user to `/authorize`. The user types an
//! API key; once the key store accepts it a single-use code is minted, and the
//! token endpoint trades that code for the API key itself as the bearer token.
//!
//! ```text
//! GET  /authorize          -> credential form (all OAuth params as hidden fields)
//! POST /authorize/submit   -> validate key -> issue code -> 302 redirect_uri?code&state
//! POST /token              -> redeem code + verifier -> {access_token: <api key>}
//! ```
//!
//! Codes and client registrations are process-local and vanish on restart.

pub mod clients;
pub mod codes;
pub mod form;
pub mod handlers;
pub mod metadata;
pub mod pkce;

use std::sync::Arc;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::config::{OAuthConfig, ServerConfig};
use crate::keys::KeyStore;

pub use clients::{ClientRegistry, RegisteredClient, RegistrationRequest};
pub use codes::{CodeEngine, CodeGrant, RedeemError, Redemption, spawn_sweeper};
pub use handlers::oauth_routes;
pub use pkce::ChallengeMethod;

/// Error returned by the registration and token endpoints (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    /// Malformed or incomplete request
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    /// Code unknown, expired, or failed verification
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    /// Anything other than `authorization_code`
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
}

impl OAuthError {
    /// Wire error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
        }
    }

    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d) | Self::InvalidGrant(d) | Self::UnsupportedGrantType(d) => d,
        }
    }
}

impl From<RedeemError> for OAuthError {
    fn from(err: RedeemError) -> Self {
        Self::InvalidGrant(err.to_string())
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            [(header::CACHE_CONTROL, "no-store")],
            Json(json!({
                "error": self.code(),
                "error_description": self.description(),
            })),
        )
            .into_response()
    }
}

/// Coordinator for the OAuth endpoints.
pub struct OAuthServer {
    /// Authorization codes
    pub codes: Arc<CodeEngine>,
    /// Dynamically registered clients
    pub clients: ClientRegistry,
    /// Key store consulted at `/authorize/submit`
    pub keys: Arc<dyn KeyStore>,
    /// OAuth settings
    pub config: OAuthConfig,
    /// Server settings (for issuer URLs)
    pub server: ServerConfig,
}

impl OAuthServer {
    /// Build the OAuth coordinator.
    #[must_use]
    pub fn new(keys: Arc<dyn KeyStore>, config: OAuthConfig, server: ServerConfig) -> Self {
        let codes = Arc::new(
            CodeEngine::new(config.code_ttl).require_redirect_uri(config.require_token_redirect_uri),
        );
        Self {
            codes,
            clients: ClientRegistry::new(),
            keys,
            config,
            server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_errors_become_invalid_grant() {
        let err: OAuthError = RedeemError::Expired.into();
        assert_eq!(err.code(), "invalid_grant");
        assert_eq!(err.description(), "Authorization code expired");
    }

    #[tokio::test]
    async fn error_response_shape() {
        let response = OAuthError::UnsupportedGrantType("only authorization_code".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "unsupported_grant_type");
        assert_eq!(json["error_description"], "only authorization_code");
    }
}
