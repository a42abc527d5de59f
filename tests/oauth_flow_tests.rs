//! End-to-end OAuth bridge tests
//!
//! Drives the full router in-process:
//! - Discovery metadata and dynamic client registration
//! - Authorize page, credential submission and redirect
//! - Token exchange, replay and error responses
//! - CORS preflight

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tower::ServiceExt;
use url::Url;

use insights_gateway::config::{Config, TierLimits};
use insights_gateway::gateway::{AppState, create_router};
use insights_gateway::keys::{ApiKeyData, JsonKeyStore, Tier};
use insights_gateway::tools::{PageFetcher, ToolRegistry};

const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

struct Offline;

#[async_trait::async_trait]
impl PageFetcher for Offline {
    async fn fetch_text(&self, url: &str) -> insights_gateway::Result<String> {
        Err(insights_gateway::Error::Fetch(format!("{url}: offline")))
    }
}

async fn app() -> Router {
    let store = Arc::new(JsonKeyStore::in_memory(TierLimits::default()));
    store
        .insert("sk_test_valid", ApiKeyData::new("acme", Tier::Pro))
        .await
        .unwrap();
    let mut inactive = ApiKeyData::new("gone", Tier::Free);
    inactive.active = false;
    store.insert("sk_test_inactive", inactive).await.unwrap();

    let mut config = Config::default();
    config.keys.path = None;
    config.server.public_url = Some("https://gw.example".to_string());

    let tools = Arc::new(ToolRegistry::with_builtin(Arc::new(Offline)));
    create_router(Arc::new(AppState::new(config, store, tools)))
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
        .unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn location(response: &Response) -> Url {
    let raw = response.headers()[header::LOCATION].to_str().unwrap();
    Url::parse(raw).unwrap()
}

fn query(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

/// Hidden inputs of a rendered authorize page, in document order.
fn hidden_fields(html: &str) -> Vec<(String, String)> {
    let re = Regex::new(r#"<input type="hidden" name="([^"]+)" value="([^"]*)">"#).unwrap();
    re.captures_iter(html)
        .map(|c| (c[1].to_string(), unescape(&c[2])))
        .collect()
}

/// What a browser would submit for an escaped attribute value.
fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn submit_fields<'a>(hidden: &'a [(String, String)], api_key: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut fields: Vec<(&str, &str)> = hidden
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    fields.push(("api_key", api_key));
    fields
}

#[test]
fn rfc7636_vector_holds() {
    assert_eq!(URL_SAFE_NO_PAD.encode(Sha256::digest(VERIFIER.as_bytes())), CHALLENGE);
}

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let app = app().await;

    // GIVEN: a client starts an authorization with an S256 challenge
    let response = send(
        &app,
        get(&format!(
            "/authorize?redirect_uri=https%3A%2F%2Fclient.example%2Fcb&code_challenge={CHALLENGE}&code_challenge_method=S256&state=xyz"
        )),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(r#"name="api_key""#));
    let hidden = hidden_fields(&html);
    assert!(hidden.contains(&("state".to_string(), "xyz".to_string())));

    // WHEN: the user submits a valid key
    let response = send(
        &app,
        post_form("/authorize/submit", &submit_fields(&hidden, "sk_test_valid")),
    )
    .await;

    // THEN: the browser is redirected back with a code and the original state
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert_eq!(target.host_str(), Some("client.example"));
    assert_eq!(target.path(), "/cb");
    let params = query(&target);
    assert_eq!(params["state"], "xyz");
    let code = params["code"].clone();

    // WHEN: the client exchanges the code with the verifier
    let response = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", VERIFIER),
            ],
        ),
    )
    .await;

    // THEN: the API key comes back as the bearer token
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(
        body_json(response).await,
        json!({
            "access_token": "sk_test_valid",
            "token_type": "Bearer",
            "expires_in": 86400,
            "scope": "mcp:tools"
        })
    );

    // AND: the code cannot be replayed
    let response = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", VERIFIER),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_invalid_key_rerenders_form_with_params() {
    let app = app().await;
    let response = send(
        &app,
        get(&format!(
            "/authorize?client_id=c1&redirect_uri=https%3A%2F%2Fclient.example%2Fcb&code_challenge={CHALLENGE}&code_challenge_method=S256&state=s%26t&scope=mcp%3Atools&resource=https%3A%2F%2Fgw.example%2Fmcp"
        )),
    )
    .await;
    let original = hidden_fields(&body_text(response).await);

    // WHEN: a wrong key is submitted
    let response = send(
        &app,
        post_form("/authorize/submit", &submit_fields(&original, "sk_wrong")),
    )
    .await;

    // THEN: the same form comes back with the store's message inline
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Invalid API key"));
    let rerendered = hidden_fields(&html);
    assert_eq!(rerendered, original);

    // AND: resubmitting that form with a good key redirects normally
    let response = send(
        &app,
        post_form("/authorize/submit", &submit_fields(&rerendered, "sk_test_valid")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(query(&location(&response))["state"], "s&t");
}

#[tokio::test]
async fn test_deactivated_key_message_is_shown() {
    let app = app().await;
    let response = send(
        &app,
        post_form(
            "/authorize/submit",
            &[
                ("api_key", "sk_test_inactive"),
                ("redirect_uri", "https://client.example/cb"),
                ("code_challenge", CHALLENGE),
                ("code_challenge_method", "S256"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("API key has been deactivated"));
}

#[tokio::test]
async fn test_authorize_without_redirect_uri_is_400() {
    let app = app().await;
    let response = send(&app, get("/authorize?state=xyz")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("redirect_uri"));
}

#[tokio::test]
async fn test_submit_form_without_content_type_is_parsed() {
    let app = app().await;
    let body = serde_urlencoded::to_string([
        ("redirect_uri", "https://client.example/cb"),
        ("state", "xyz"),
        ("code_challenge", CHALLENGE),
        ("code_challenge_method", "S256"),
        ("api_key", "sk_test_valid"),
    ])
    .unwrap();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/authorize/submit")
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(query(&location(&response))["state"], "xyz");
}

#[tokio::test]
async fn test_malformed_submit_form_is_invalid_request() {
    let app = app().await;

    // GIVEN: a form with the credential field repeated
    let response = send(
        &app,
        post_form(
            "/authorize/submit",
            &[
                ("redirect_uri", "https://client.example/cb"),
                ("api_key", "x"),
                ("api_key", "y"),
            ],
        ),
    )
    .await;

    // THEN: an OAuth error body, not an extractor rejection
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_oversized_body_keeps_cors_headers() {
    let app = app().await;
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(vec![b'a'; 2 * 1024 * 1024]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let app = app().await;

    let response = send(
        &app,
        post_form("/token", &[("grant_type", "client_credentials")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");

    let response = send(
        &app,
        post_json("/token", &json!({"grant_type": "authorization_code", "code": "abc"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");

    let response = send(
        &app,
        post_json(
            "/token",
            &json!({"grant_type": "authorization_code", "code": "never-issued", "code_verifier": VERIFIER}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "Authorization code not found or expired");
}

#[tokio::test]
async fn test_wrong_verifier_burns_code() {
    let app = app().await;
    let response = send(
        &app,
        post_form(
            "/authorize/submit",
            &[
                ("api_key", "sk_test_valid"),
                ("redirect_uri", "https://client.example/cb"),
                ("code_challenge", CHALLENGE),
                ("code_challenge_method", "S256"),
            ],
        ),
    )
    .await;
    let code = query(&location(&response))["code"].clone();

    let exchange = |verifier: &'static str| {
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", verifier),
            ],
        )
    };

    let response = send(&app, exchange("not-the-verifier-at-all-but-long-enough-000")).await;
    let body = body_json(response).await;
    assert_eq!(body["error_description"], "code_verifier does not match code_challenge");
    assert!(!body.to_string().contains(CHALLENGE));

    let response = send(&app, exchange(VERIFIER)).await;
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_metadata_documents() {
    let app = app().await;

    let response = send(&app, get("/.well-known/oauth-authorization-server")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let meta = body_json(response).await;
    assert_eq!(meta["issuer"], "https://gw.example");
    assert_eq!(meta["token_endpoint"], "https://gw.example/token");
    assert_eq!(meta["code_challenge_methods_supported"], json!(["S256", "plain"]));
    assert_eq!(meta["client_id_metadata_document_supported"], true);

    let response = send(&app, get("/.well-known/openid-configuration")).await;
    assert_eq!(body_json(response).await, meta);

    for path in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let response = send(&app, get(path)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let resource = body_json(response).await;
        assert_eq!(resource["resource"], "https://gw.example/mcp");
        assert_eq!(resource["authorization_servers"], json!(["https://gw.example"]));
    }
}

#[tokio::test]
async fn test_dynamic_client_registration() {
    let app = app().await;

    let response = send(
        &app,
        post_json(
            "/register",
            &json!({"client_name": "Inspector", "redirect_uris": ["https://client.example/cb"]}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let client = body_json(response).await;
    assert_eq!(client["client_name"], "Inspector");
    assert_eq!(client["token_endpoint_auth_method"], "none");
    assert!(client["client_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(client.get("client_secret").is_none());

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_cors_preflight_on_any_path() {
    let app = app().await;
    for path in ["/token", "/mcp", "/does-not-exist"] {
        let response = send(
            &app,
            Request::builder()
                .method("OPTIONS")
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, DELETE, OPTIONS"
        );
        assert!(
            headers[header::ACCESS_CONTROL_EXPOSE_HEADERS]
                .to_str()
                .unwrap()
                .contains("mcp-session-id")
        );
    }

    let response = send(&app, get("/.well-known/oauth-authorization-server")).await;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
