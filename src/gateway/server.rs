//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::keys::{JsonKeyStore, KeyStore};
use crate::oauth::spawn_sweeper;
use crate::tools::{HttpFetcher, ToolRegistry};
use crate::{Error, Result};

/// Insights gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a gateway, opening the configured key store.
    pub async fn new(config: Config) -> Result<Self> {
        let keys: Arc<dyn KeyStore> = match &config.keys.path {
            Some(path) => Arc::new(JsonKeyStore::open(path.clone(), config.keys.tiers.clone()).await?),
            None => {
                warn!("No key file configured, using an empty in-memory key store");
                Arc::new(JsonKeyStore::in_memory(config.keys.tiers.clone()))
            }
        };
        Self::with_key_store(config, keys)
    }

    /// Create a gateway over an existing key store.
    pub fn with_key_store(config: Config, keys: Arc<dyn KeyStore>) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.tools)?);
        let tools = Arc::new(ToolRegistry::with_builtin(fetcher));
        let state = Arc::new(AppState::new(config.clone(), keys, tools));
        Ok(Self { config, state })
    }

    /// Shared state, for embedding the router elsewhere
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let sweeper = spawn_sweeper(
            Arc::clone(&self.state.oauth.codes),
            self.config.oauth.sweep_interval,
            shutdown_tx.subscribe(),
        );

        let app = create_router(Arc::clone(&self.state));

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        let base = self
            .config
            .server
            .public_url
            .clone()
            .unwrap_or_else(|| self.config.server.fallback_base_url());
        info!("============================================================");
        info!("INSIGHTS GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(tools = self.state.tools.len(), "Tools registered");
        info!("  POST {base}/mcp  (JSON-RPC)");
        info!("  GET  {base}/mcp  (SSE notifications)");
        info!("  GET  {base}/.well-known/oauth-authorization-server");
        info!("============================================================");

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        // A server error exits before the signal handler fires; stop the sweeper either way
        let _ = shutdown_tx.send(());
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Code sweeper did not stop cleanly");
        }

        info!("Closing sessions...");
        self.state.sessions.close_all();

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
