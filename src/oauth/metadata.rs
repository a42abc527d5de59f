//! OAuth metadata documents
//!
//! RFC 8414 (Authorization Server Metadata) and RFC 9728 (Protected Resource
//! Metadata), served from `/.well-known/*`.

use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

/// Path of the protocol endpoint, relative to the base URL
pub const MCP_PATH: &str = "/mcp";

/// Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// Dynamic client registration endpoint
    pub registration_endpoint: String,
    /// Supported scopes
    pub scopes_supported: Vec<String>,
    /// Supported response types
    pub response_types_supported: Vec<String>,
    /// Supported grant types
    pub grant_types_supported: Vec<String>,
    /// Supported PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Clients may use a metadata document URL as their `client_id`
    pub client_id_metadata_document_supported: bool,
}

impl AuthorizationServerMetadata {
    /// Metadata for an issuer at `base_url`.
    #[must_use]
    pub fn for_issuer(base_url: &str, scope: &str) -> Self {
        Self {
            issuer: base_url.to_string(),
            authorization_endpoint: format!("{base_url}/authorize"),
            token_endpoint: format!("{base_url}/token"),
            registration_endpoint: format!("{base_url}/register"),
            scopes_supported: vec![scope.to_string()],
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec!["authorization_code".to_string()],
            code_challenge_methods_supported: vec!["S256".to_string(), "plain".to_string()],
            token_endpoint_auth_methods_supported: vec![
                "none".to_string(),
                "client_secret_post".to_string(),
            ],
            client_id_metadata_document_supported: true,
        }
    }
}

/// Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,
    /// Authorization servers that issue tokens for this resource
    pub authorization_servers: Vec<String>,
    /// Supported scopes
    pub scopes_supported: Vec<String>,
    /// How bearer tokens may be presented
    pub bearer_methods_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// Metadata for the protocol endpoint under `base_url`.
    #[must_use]
    pub fn for_base(base_url: &str, scope: &str) -> Self {
        Self {
            resource: format!("{base_url}{MCP_PATH}"),
            authorization_servers: vec![base_url.to_string()],
            scopes_supported: vec![scope.to_string()],
            bearer_methods_supported: vec!["header".to_string()],
        }
    }
}

/// URL of the protected-resource metadata document, used in `WWW-Authenticate`.
#[must_use]
pub fn resource_metadata_url(base_url: &str) -> String {
    format!("{base_url}/.well-known/oauth-protected-resource{MCP_PATH}")
}

/// Externally visible base URL for this request.
///
/// `public_url` wins. Otherwise the `Host` header (with `X-Forwarded-Proto`)
/// is used, falling back to the bind address.
#[must_use]
pub fn base_url(config: &ServerConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty());
    match host {
        Some(host) => {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map_or("http", str::trim);
            format!("{proto}://{host}")
        }
        None => config.fallback_base_url(),
    }
}
