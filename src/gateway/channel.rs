//! Per-session protocol channel.
//!
//! A channel answers JSON-RPC messages for one session against the shared
//! [`ToolRegistry`] and fans server-to-client notifications out to any open
//! event streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ToolsCallParams, ToolsCallResult,
    ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::tools::{ToolError, ToolRegistry};
use crate::{Error, Result};

/// Capacity of the per-channel notification buffer
const NOTIFICATION_CAPACITY: usize = 64;

/// What the channel produced for one inbound message.
#[derive(Debug)]
pub enum ChannelReply {
    /// A response to send back in the HTTP body
    Response(JsonRpcResponse),
    /// Nothing to answer (notification or client response)
    Accepted,
}

/// Protocol state for one session.
pub struct ToolChannel {
    tools: Arc<ToolRegistry>,
    server_info: Info,
    initialized: AtomicBool,
    protocol_version: RwLock<Option<&'static str>>,
    notifications: broadcast::Sender<JsonRpcNotification>,
    closed: AtomicBool,
}

impl ToolChannel {
    /// Open a channel over the given tool table.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            tools,
            server_info: Info {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Insights Gateway".to_string()),
            },
            initialized: AtomicBool::new(false),
            protocol_version: RwLock::new(None),
            notifications,
            closed: AtomicBool::new(false),
        }
    }

    /// `true` once an `initialize` request has been answered.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Protocol version agreed during `initialize`
    #[must_use]
    pub fn protocol_version(&self) -> Option<&'static str> {
        *self.protocol_version.read()
    }

    /// `true` after [`close`](Self::close)
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receive server-to-client notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications.subscribe()
    }

    /// Close the channel. Fails if it was already closed.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Session("Channel already closed".to_string()));
        }
        Ok(())
    }

    /// Handle one inbound message.
    pub async fn handle(&self, message: JsonRpcMessage) -> ChannelReply {
        match message {
            JsonRpcMessage::Request(request) => ChannelReply::Response(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "Client notification");
                ChannelReply::Accepted
            }
            JsonRpcMessage::Response(response) => {
                debug!(id = ?response.id, "Client response ignored");
                ChannelReply::Accepted
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        if self.is_closed() {
            return JsonRpcResponse::error(Some(id), rpc_codes::SERVER_ERROR_START, "Session closed");
        }

        if !self.is_initialized() && !matches!(request.method.as_str(), "initialize" | "ping") {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::SERVER_ERROR_START,
                "Bad Request: Server not initialized",
            );
        }

        match request.method.as_str() {
            "initialize" => self.initialize(request),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let result = ToolsListResult {
                    tools: self.tools.list(),
                    next_cursor: None,
                };
                to_response(id, &result)
            }
            "tools/call" => self.call_tool(request).await,
            other => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }

    fn initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = request
            .params
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or_default()
            .unwrap_or_default();

        let version = negotiate_version(params.protocol_version.as_deref());
        *self.protocol_version.write() = Some(version);
        self.initialized.store(true, Ordering::Release);

        info!(
            protocol_version = version,
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            "Session initialized"
        );

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.server_info.clone(),
            instructions: Some(
                "Social media analytics tools: profile analysis, engagement scoring, trend detection and hashtag research."
                    .to_string(),
            ),
        };
        to_response(request.id, &result)
    }

    async fn call_tool(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        let params = request.params.unwrap_or(Value::Null);
        let progress_token = params
            .get("_meta")
            .and_then(|m| m.get("progressToken"))
            .cloned();

        let call: ToolsCallParams = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(e) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {e}"),
                );
            }
        };

        if let Some(token) = &progress_token {
            self.progress(token, 0, &format!("Running {}", call.name));
        }

        let outcome = self.tools.call(&call.name, &call.arguments).await;

        if let Some(token) = &progress_token {
            self.progress(token, 1, "Done");
        }

        match outcome {
            Ok(text) => to_response(id, &ToolsCallResult::text(text)),
            Err(err @ (ToolError::UnknownTool(_) | ToolError::InvalidParams(_))) => {
                debug!(tool = %call.name, error = %err, "Rejected tool call");
                JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, err.to_string())
            }
            Err(ToolError::Execution(message)) => {
                warn!(tool = %call.name, error = %message, "Tool execution failed");
                to_response(id, &ToolsCallResult::error(message))
            }
        }
    }

    fn progress(&self, token: &Value, progress: u32, message: &str) {
        let notification = JsonRpcNotification::new(
            "notifications/progress",
            Some(json!({
                "progressToken": token,
                "progress": progress,
                "total": 1,
                "message": message
            })),
        );
        // No open stream is fine
        let _ = self.notifications.send(notification);
    }
}

fn to_response<T: serde::Serialize>(id: crate::protocol::RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}
