//! Insights Gateway Library
//!
//! OAuth 2.0 + PKCE bridge to tiered API keys, in front of an MCP
//! (Model Context Protocol) tool server for social media analytics.
//!
//! # Features
//!
//! - **OAuth bridge**: discovery metadata, dynamic client registration, a
//!   credential-entry authorize page and a token endpoint that hands back the
//!   API key itself as the bearer token
//! - **Key store**: tiered keys with monthly quotas and per-minute rate limits
//! - **Sessions**: MCP Streamable HTTP with per-session channels and SSE notifications
//! - **Discovery bypass**: `initialize` and `tools/list` work without a key
//! - **Tools**: profile analysis, engagement scoring, trend and hashtag research
//!
//! # Protocol Version
//!
//! Speaks MCP 2025-06-18, and accepts 2025-03-26 and 2024-11-05.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod oauth;
pub mod protocol;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
    }

    Ok(())
}
