//! Session multiplexer for the streamable HTTP transport
//!
//! - `POST /mcp` without a session opens a [`ToolChannel`]; it is registered
//!   under a fresh `mcp-session-id` only once the channel is initialized
//! - `GET /mcp` streams the session's notifications as SSE
//! - `DELETE /mcp` closes the session

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::ToolChannel;
use crate::keys::preview;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Header carrying the session identifier
pub const SESSION_HEADER: &str = "mcp-session-id";

/// A registered session
pub struct Session {
    /// Session identifier
    pub id: String,
    /// Protocol channel
    pub channel: Arc<ToolChannel>,
    /// Credential that created the session (`None` for discovery sessions)
    pub api_key: Option<String>,
}

/// Routes protocol traffic to per-session channels.
pub struct SessionMultiplexer {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    tools: Arc<ToolRegistry>,
    max_sessions: usize,
}

impl SessionMultiplexer {
    /// Create a multiplexer. `max_sessions` of 0 means unbounded.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tools,
            max_sessions,
        }
    }

    /// Open a fresh, unregistered channel.
    pub fn open_channel(&self) -> Result<Arc<ToolChannel>> {
        let open = self.sessions.read().len();
        if self.max_sessions > 0 && open >= self.max_sessions {
            return Err(Error::Session(format!(
                "Session limit reached ({open}/{})",
                self.max_sessions
            )));
        }
        Ok(Arc::new(ToolChannel::new(Arc::clone(&self.tools))))
    }

    /// Register an initialized channel under a new session id.
    pub fn register(&self, channel: Arc<ToolChannel>, api_key: Option<String>) -> Result<Arc<Session>> {
        if !channel.is_initialized() {
            return Err(Error::Session("Channel is not initialized".to_string()));
        }

        let mut sessions = self.sessions.write();
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(Error::Session(format!(
                "Session limit reached ({}/{})",
                sessions.len(),
                self.max_sessions
            )));
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            channel,
            api_key,
        });
        sessions.insert(id.clone(), Arc::clone(&session));
        info!(
            session_id = %id,
            key = %session.api_key.as_deref().map_or_else(|| "discovery".to_string(), preview),
            "Session registered"
        );
        Ok(session)
    }

    /// Look up a session
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Close and forget a session. Returns `false` if it was unknown.
    pub fn remove(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(session_id) else {
            return false;
        };
        if let Err(e) = session.channel.close() {
            debug!(session_id, error = %e, "Channel already closed");
        }
        info!(session_id, "Session closed");
        true
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// `true` when no sessions are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Close every session. Individual failures are logged and skipped.
    ///
    /// Returns how many channels closed cleanly.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let mut closed = 0;
        for session in drained {
            match session.channel.close() {
                Ok(()) => closed += 1,
                Err(e) => warn!(session_id = %session.id, error = %e, "Failed to close session"),
            }
        }
        info!(closed, "Closed open sessions");
        closed
    }
}

/// SSE stream of a session's notifications for `GET /mcp`.
///
/// Takes owned data to satisfy Rust 2024 lifetime capture rules for `impl Stream`.
pub fn create_sse_response(
    session: Arc<Session>,
    keep_alive_interval: Duration,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = session.channel.subscribe();
    let session_id = session.id.clone();

    let stream = stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "session_id": session_id }).to_string()));

        loop {
            match rx.recv().await {
                Ok(notification) => {
                    yield Ok(Event::default()
                        .event("message")
                        .data(serde_json::to_string(&notification).unwrap_or_default()));
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Client fell behind, notify them
                    yield Ok(Event::default()
                        .event("lagged")
                        .data(json!({ "missed": n }).to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive_interval).text("ping"))
}
