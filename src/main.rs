//! Insights Gateway - OAuth bridge and MCP gateway for social media analytics tools

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use insights_gateway::{
    cli::{Cli, Command, KeysCommand},
    config::Config,
    gateway::Gateway,
    keys::{JsonKeyStore, preview},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Keys(cmd)) => run_keys_command(config, cmd).await,
        Some(Command::Serve { port, host }) => run_server(config, port, host).await,
        None => run_server(config, None, None).await,
    }
}

/// Run key management commands against the configured key file
async fn run_keys_command(config: Config, cmd: KeysCommand) -> ExitCode {
    let Some(path) = config.keys.path.clone() else {
        eprintln!("❌ No key file configured (set keys.path)");
        return ExitCode::FAILURE;
    };
    let store = match JsonKeyStore::open(path, config.keys.tiers.clone()).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Failed to open key store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cmd {
        KeysCommand::Create { name, tier } => store.create_key(&name, tier).await.map(|key| {
            println!("✅ Created {tier} key for {name}");
            println!("{key}");
        }),
        KeysCommand::List => {
            let keys = store.list().await;
            if keys.is_empty() {
                println!("No API keys.");
            }
            for (key, data) in keys {
                let limit = store.limits().for_tier(data.tier).monthly_limit;
                println!(
                    "{:<14} {:<20} {:<9} {:<8} {}/{}",
                    preview(&key),
                    data.name,
                    data.tier.as_str(),
                    if data.active { "active" } else { "inactive" },
                    data.current_usage(),
                    if limit == 0 { "∞".to_string() } else { limit.to_string() },
                );
            }
            Ok(())
        }
        KeysCommand::Deactivate { key } => store
            .set_active(&key, false)
            .await
            .map(|()| println!("✅ Deactivated {}", preview(&key))),
        KeysCommand::Activate { key } => store
            .set_active(&key, true)
            .await
            .map(|()| println!("✅ Activated {}", preview(&key))),
        KeysCommand::SetTier { key, tier } => store
            .set_tier(&key, tier)
            .await
            .map(|()| println!("✅ {} is now on the {tier} tier", preview(&key))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(mut config: Config, port: Option<u16>, host: Option<String>) -> ExitCode {
    // Apply CLI overrides
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        key_file = ?config.keys.path,
        "Starting Insights Gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
