//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use super::auth::{AuthRejection, Authenticator, Caller, extract_credential};
use super::channel::ChannelReply;
use super::session::{SESSION_HEADER, Session, SessionMultiplexer, create_sse_response};
use crate::Error;
use crate::config::Config;
use crate::error::rpc_codes;
use crate::keys::{KeyRejection, KeyStore, preview};
use crate::oauth::{OAuthServer, metadata, oauth_routes};
use crate::protocol::{JsonRpcMessage, JsonRpcResponse};
use crate::tools::ToolRegistry;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Key store
    pub keys: Arc<dyn KeyStore>,
    /// Credential validation and rate limiting
    pub authenticator: Authenticator,
    /// Tool table shared by every session
    pub tools: Arc<ToolRegistry>,
    /// Open sessions
    pub sessions: Arc<SessionMultiplexer>,
    /// OAuth bridge
    pub oauth: Arc<OAuthServer>,
}

impl AppState {
    /// Wire up state from configuration, a key store and a tool table.
    #[must_use]
    pub fn new(config: Config, keys: Arc<dyn KeyStore>, tools: Arc<ToolRegistry>) -> Self {
        let authenticator = Authenticator::new(Arc::clone(&keys), config.keys.tiers.clone());
        let sessions = Arc::new(SessionMultiplexer::new(
            Arc::clone(&tools),
            config.server.max_sessions,
        ));
        let oauth = Arc::new(OAuthServer::new(
            Arc::clone(&keys),
            config.oauth.clone(),
            config.server.clone(),
        ));
        Self {
            config,
            keys,
            authenticator,
            tools,
            sessions,
            oauth,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.server.max_body_size;

    let routes = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/mcp",
            post(mcp_post_handler)
                .get(mcp_sse_handler)
                .delete(mcp_delete_handler),
        )
        .route("/", post(mcp_post_handler))
        .with_state(Arc::clone(&state))
        .merge(oauth_routes(Arc::clone(&state.oauth)))
        .fallback(not_found_handler);
    with_layers(routes, max_body_size)
}

/// Shared middleware stack. CORS sits outside the panic guard so every
/// response, including a caught panic, carries the CORS headers.
fn with_layers(routes: Router, max_body_size: usize) -> Router {
    routes
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(cors_middleware))
        .layer(TraceLayer::new_for_http())
}

// ── CORS ──────────────────────────────────────────────────────────────────

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "content-type, authorization, mcp-session-id, x-api-key, api-key, mcp-protocol-version, last-event-id";
const EXPOSE_HEADERS: &str = "mcp-session-id, www-authenticate";

/// Permissive CORS. `OPTIONS` on any path is answered here with 204.
async fn cors_middleware(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    response
}

// ── Protocol endpoint ─────────────────────────────────────────────────────

/// JSON-RPC error envelope with `id: null` and the given HTTP status.
fn rpc_error(status: StatusCode, code: i32, message: &str) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Parse a POST body into a single JSON-RPC message.
fn parse_message(body: &[u8]) -> Result<JsonRpcMessage, Response> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Unparsable protocol body");
        rpc_error(StatusCode::BAD_REQUEST, rpc_codes::PARSE_ERROR, "Parse error")
    })?;
    if value.is_array() {
        return Err(rpc_error(
            StatusCode::BAD_REQUEST,
            rpc_codes::INVALID_REQUEST,
            "Batch requests are not supported",
        ));
    }
    serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "Body is not a JSON-RPC message");
        rpc_error(StatusCode::BAD_REQUEST, rpc_codes::INVALID_REQUEST, "Invalid Request")
    })
}

/// 500 with a generic message. Details belong in the log, not the response.
fn internal_error(err: &Error) -> Response {
    rpc_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        err.to_rpc_code(),
        "Internal server error",
    )
}

fn reply_response(reply: ChannelReply, session_id: &str) -> Response {
    let mut response = match reply {
        ChannelReply::Response(body) => (StatusCode::OK, Json(body)).into_response(),
        ChannelReply::Accepted => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// POST /mcp (and POST /) - JSON-RPC over streamable HTTP
async fn mcp_post_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(response) => return response,
    };
    let method = message.method().map(ToString::to_string);

    let credential = extract_credential(&headers, &uri);
    let caller = match state
        .authenticator
        .authenticate(credential.as_deref(), method.as_deref())
        .await
    {
        Ok(caller) => caller,
        Err(rejection) => {
            let base = metadata::base_url(&state.config.server, &headers);
            return rejection.into_response(&base);
        }
    };

    // Existing session. Only a tools/call request runs a tool; the
    // notification form is accepted and dropped by the channel.
    if let Some(session) = session_id(&headers).and_then(|id| state.sessions.get(id)) {
        if matches!(&message, JsonRpcMessage::Request(r) if r.method == "tools/call") {
            if let Err(response) = debit(&state, &caller, &headers).await {
                return response;
            }
        }
        debug!(session_id = %session.id, method = method.as_deref().unwrap_or("-"), "Routing to session");
        let reply = session.channel.handle(message).await;
        return reply_response(reply, &session.id);
    }

    // New session
    let channel = match state.sessions.open_channel() {
        Ok(channel) => channel,
        Err(e) => {
            error!(error = %e, "Failed to open session channel");
            return internal_error(&e);
        }
    };
    if let Err(response) = debit(&state, &caller, &headers).await {
        return response;
    }

    let reply = channel.handle(message).await;
    if !channel.is_initialized() {
        debug!(method = method.as_deref().unwrap_or("-"), "First message did not initialize a session");
        return rpc_error(
            StatusCode::BAD_REQUEST,
            rpc_codes::SERVER_ERROR_START,
            "Bad Request: Server not initialized",
        );
    }

    match state
        .sessions
        .register(channel, caller.key().map(ToString::to_string))
    {
        Ok(session) => reply_response(reply, &session.id),
        Err(e) => {
            error!(error = %e, "Failed to register session");
            internal_error(&e)
        }
    }
}

/// Debit one usage unit for credentialed callers.
async fn debit(state: &AppState, caller: &Caller, headers: &HeaderMap) -> Result<(), Response> {
    let Some(key) = caller.key() else {
        return Ok(());
    };
    match state.keys.record_usage(key).await {
        Ok(count) => {
            debug!(key = %preview(key), tier = %caller.tier(), count, "Usage recorded");
            Ok(())
        }
        Err(Error::Rejected(reason)) => {
            warn!(key = %preview(key), reason = %reason, "Usage debit refused");
            let base = metadata::base_url(&state.config.server, headers);
            Err(AuthRejection::Rejected(reason).into_response(&base))
        }
        Err(e) => {
            error!(key = %preview(key), error = %e, "Failed to record usage");
            Err(internal_error(&e))
        }
    }
}

/// Resolve the session for GET/DELETE.
///
/// These verbs carry no JSON-RPC method, so there is no discovery bypass: the
/// caller must present a usable key. A session opened with a key can only be
/// addressed with that same key.
async fn session_for_stream(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Arc<Session>, Response> {
    let credential = extract_credential(headers, uri);
    let caller = state
        .authenticator
        .authenticate(credential.as_deref(), None)
        .await
        .map_err(|rejection| {
            let base = metadata::base_url(&state.config.server, headers);
            rejection.into_response(&base)
        })?;

    let Some(session) = session_id(headers).and_then(|id| state.sessions.get(id)) else {
        return Err(rpc_error(
            StatusCode::BAD_REQUEST,
            rpc_codes::SERVER_ERROR_START,
            "Bad Request: No valid session ID provided",
        ));
    };

    if let Some(owner) = &session.api_key {
        if caller.key() != Some(owner.as_str()) {
            warn!(session_id = %session.id, "Session addressed with another credential");
            let base = metadata::base_url(&state.config.server, headers);
            return Err(AuthRejection::Rejected(KeyRejection::Invalid).into_response(&base));
        }
    }
    Ok(session)
}

/// GET /mcp - SSE stream for server→client notifications
async fn mcp_sse_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let session = match session_for_stream(&state, &uri, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    info!(session_id = %session.id, "Client connected to SSE stream");
    let session_id = session.id.clone();
    let mut response =
        create_sse_response(session, state.config.server.keep_alive_interval).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// DELETE /mcp - Session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match session_for_stream(&state, &uri, &headers).await {
        Ok(session) => {
            state.sessions.remove(&session.id);
            info!(session_id = %session.id, "Session terminated by client");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(response) => response,
    }
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len()
    }))
}
