//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::keys::Tier;

/// OAuth-to-API-key bridge and MCP gateway for social media analytics tools
#[derive(Parser, Debug)]
#[command(name = "insights-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "INSIGHTS_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "INSIGHTS_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "INSIGHTS_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "INSIGHTS_GATEWAY_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, env = "INSIGHTS_GATEWAY_HOST")]
        host: Option<String>,
    },

    /// API key management commands
    #[command(subcommand)]
    Keys(KeysCommand),
}

/// API key subcommands
#[derive(Subcommand, Debug)]
pub enum KeysCommand {
    /// Create a new API key and print it
    Create {
        /// Owner name
        #[arg(required = true)]
        name: String,

        /// Tier (free, starter, pro, business)
        #[arg(short, long, default_value = "free")]
        tier: Tier,
    },

    /// List keys with their tier, status and usage this month
    List,

    /// Deactivate a key
    Deactivate {
        /// The API key
        #[arg(required = true)]
        key: String,
    },

    /// Reactivate a key
    Activate {
        /// The API key
        #[arg(required = true)]
        key: String,
    },

    /// Move a key to another tier
    SetTier {
        /// The API key
        #[arg(required = true)]
        key: String,

        /// New tier (free, starter, pro, business)
        #[arg(required = true)]
        tier: Tier,
    },
}
