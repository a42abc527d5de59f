//! Dynamic Client Registration (RFC 7591)
//!
//! Registrations are kept in memory for the life of the process. Any client
//! may register; registering an existing `client_id` overwrites it.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Redirect URIs assigned when a client registers none.
pub const DEFAULT_REDIRECT_URIS: &[&str] = &[
    "http://localhost:3000/callback",
    "http://127.0.0.1:3000/callback",
];

/// Registration request body. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    /// Client-chosen identifier
    #[serde(default)]
    pub client_id: Option<String>,
    /// Allowed redirect URIs
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    /// Human-readable name
    #[serde(default)]
    pub client_name: Option<String>,
    /// Grant types
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    /// Response types
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    /// Token endpoint auth method
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// A registered client, returned as the registration response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Unique client identifier
    pub client_id: String,
    /// Only issued for `client_secret_post` clients. Never verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Human-readable name
    pub client_name: String,
    /// Allowed redirect URIs
    pub redirect_uris: Vec<String>,
    /// Grant types
    pub grant_types: Vec<String>,
    /// Response types
    pub response_types: Vec<String>,
    /// Token endpoint auth method
    pub token_endpoint_auth_method: String,
    /// Registration time (Unix seconds)
    pub client_id_issued_at: i64,
    /// Scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Outcome of checking a redirect URI against a client's registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectCheck {
    /// No client registered under this id
    UnknownClient,
    /// URI is one the client registered
    Registered,
    /// Client exists but never registered this URI
    Unregistered,
}

/// In-memory client registry.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl ClientRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, filling defaults for anything unset.
    pub fn register(&self, request: RegistrationRequest) -> RegisteredClient {
        let client_id = request
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_client_id);
        let token_endpoint_auth_method = request
            .token_endpoint_auth_method
            .unwrap_or_else(|| "none".to_string());
        let client_secret = (token_endpoint_auth_method == "client_secret_post")
            .then(generate_client_secret);

        let client = RegisteredClient {
            client_id: client_id.clone(),
            client_secret,
            client_name: request
                .client_name
                .unwrap_or_else(|| "MCP Client".to_string()),
            redirect_uris: request
                .redirect_uris
                .filter(|uris| !uris.is_empty())
                .unwrap_or_else(|| DEFAULT_REDIRECT_URIS.iter().map(ToString::to_string).collect()),
            grant_types: request
                .grant_types
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| vec!["authorization_code".to_string()]),
            response_types: request
                .response_types
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| vec!["code".to_string()]),
            token_endpoint_auth_method,
            client_id_issued_at: chrono::Utc::now().timestamp(),
            scope: request.scope,
        };

        info!(
            client_id = %client.client_id,
            client_name = %client.client_name,
            redirect_uris = client.redirect_uris.len(),
            "Registered OAuth client"
        );
        self.clients.insert(client_id, client.clone());
        client
    }

    /// Look up a client by id.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    /// Check whether `redirect_uri` is one `client_id` registered.
    #[must_use]
    pub fn check_redirect(&self, client_id: &str, redirect_uri: &str) -> RedirectCheck {
        match self.clients.get(client_id) {
            None => RedirectCheck::UnknownClient,
            Some(client) if client.redirect_uris.iter().any(|u| u == redirect_uri) => {
                RedirectCheck::Registered
            }
            Some(_) => RedirectCheck::Unregistered,
        }
    }

    /// Number of registered clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_client_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
