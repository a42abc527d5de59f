//! Error types for the insights gateway

use std::io;

use thiserror::Error;

use crate::keys::KeyRejection;

/// Result type alias for the insights gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key store error (unknown key on an admin operation, corrupt key file)
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Credential refused while debiting usage
    #[error(transparent)]
    Rejected(#[from] KeyRejection),

    /// Session could not be opened or was not found
    #[error("Session error: {0}")]
    Session(String),

    /// Outbound page fetch failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Fetch(_) | Self::Http(_) => rpc_codes::SERVER_ERROR_START,
            Self::Rejected(_) => rpc_codes::UNAUTHORIZED,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start (generic transport / session failures)
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Missing or rejected credential
    pub const UNAUTHORIZED: i32 = -32001;
}
