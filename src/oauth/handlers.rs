//! HTTP handlers for the OAuth endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/.well-known/oauth-protected-resource[/mcp]` | Protected resource metadata |
//! | `GET` | `/.well-known/oauth-authorization-server` | Authorization server metadata |
//! | `GET` | `/.well-known/openid-configuration` | Same document, OIDC discovery path |
//! | `POST` | `/register` | Dynamic client registration |
//! | `GET` | `/authorize` | Credential-entry page |
//! | `POST` | `/authorize/submit` | Validate key, issue code, redirect |
//! | `POST` | `/token` | Exchange code + verifier for the API key |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    CodeGrant, OAuthError, OAuthServer,
    clients::{RedirectCheck, RegistrationRequest},
    form::{AuthorizeParams, SubmitForm, render_login_page},
    metadata::{self, AuthorizationServerMetadata, ProtectedResourceMetadata},
    pkce::ChallengeMethod,
};
use crate::keys::preview;

/// Build the OAuth routes.
///
/// Mounted without the credential middleware: these endpoints are how a
/// client obtains a credential in the first place.
pub fn oauth_routes(oauth: Arc<OAuthServer>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/openid-configuration",
            get(authorization_server_metadata),
        )
        .route("/register", post(register_client))
        .route("/authorize", get(authorize))
        .route("/authorize/submit", post(authorize_submit))
        .route("/token", post(token))
        .with_state(oauth)
}

// ── Discovery ─────────────────────────────────────────────────────────────

async fn protected_resource_metadata(
    State(oauth): State<Arc<OAuthServer>>,
    headers: HeaderMap,
) -> Json<ProtectedResourceMetadata> {
    let base = metadata::base_url(&oauth.server, &headers);
    Json(ProtectedResourceMetadata::for_base(
        &base,
        &oauth.config.default_scope,
    ))
}

async fn authorization_server_metadata(
    State(oauth): State<Arc<OAuthServer>>,
    headers: HeaderMap,
) -> Json<AuthorizationServerMetadata> {
    let base = metadata::base_url(&oauth.server, &headers);
    Json(AuthorizationServerMetadata::for_issuer(
        &base,
        &oauth.config.default_scope,
    ))
}

// ── Registration ──────────────────────────────────────────────────────────

/// `POST /register`: RFC 7591 dynamic client registration.
async fn register_client(State(oauth): State<Arc<OAuthServer>>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RegistrationRequest::default()
    } else {
        match serde_json::from_slice::<RegistrationRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "Unparsable registration request");
                return OAuthError::InvalidRequest("Invalid client registration request".into())
                    .into_response();
            }
        }
    };

    let client = oauth.clients.register(request);
    (StatusCode::CREATED, Json(client)).into_response()
}

// ── Authorization ─────────────────────────────────────────────────────────

/// Every way an authorization step can end.
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Nowhere safe to redirect to
    BadRequest(&'static str),
    /// Show the credential form, optionally with an inline error
    RenderForm {
        /// Carried OAuth parameters
        params: AuthorizeParams,
        /// Inline error
        error: Option<String>,
    },
    /// Send the browser back to the client (code or OAuth error)
    Redirect(String),
}

impl IntoResponse for AuthorizeOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            Self::RenderForm { params, error } => {
                Html(render_login_page(&params, error.as_deref())).into_response()
            }
            Self::Redirect(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
        }
    }
}

/// `GET /authorize`: render the credential form.
async fn authorize(
    State(oauth): State<Arc<OAuthServer>>,
    Query(params): Query<AuthorizeParams>,
) -> AuthorizeOutcome {
    begin_authorization(&oauth, params)
}

fn begin_authorization(oauth: &OAuthServer, params: AuthorizeParams) -> AuthorizeOutcome {
    let Some(redirect_uri) = params.redirect_uri() else {
        return AuthorizeOutcome::BadRequest("Missing redirect_uri parameter");
    };

    if let Some(client_id) = params.client_id.as_deref().filter(|c| !c.is_empty()) {
        if oauth.clients.check_redirect(client_id, redirect_uri) == RedirectCheck::Unregistered {
            warn!(
                client_id,
                redirect_uri, "redirect_uri not registered for client"
            );
            if oauth.config.strict_redirect_uris {
                return AuthorizeOutcome::BadRequest("redirect_uri is not registered for this client");
            }
        }
    }

    AuthorizeOutcome::RenderForm {
        params,
        error: None,
    }
}

/// `POST /authorize/submit`: validate the key and redirect with a code.
///
/// The body is parsed as a form whatever the `Content-Type`, like `/token`.
async fn authorize_submit(State(oauth): State<Arc<OAuthServer>>, body: Bytes) -> Response {
    let form: SubmitForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => {
            debug!(error = %e, "Unparsable authorization form");
            return OAuthError::InvalidRequest("Malformed form body".into()).into_response();
        }
    };
    let (api_key, params) = form.into_parts();
    submit_authorization(&oauth, &api_key, params)
        .await
        .into_response()
}

async fn submit_authorization(
    oauth: &OAuthServer,
    api_key: &str,
    params: AuthorizeParams,
) -> AuthorizeOutcome {
    let Some(redirect_uri) = params.redirect_uri().map(ToString::to_string) else {
        return AuthorizeOutcome::BadRequest("Missing redirect_uri parameter");
    };
    let Ok(mut target) = Url::parse(&redirect_uri) else {
        return AuthorizeOutcome::BadRequest("Invalid redirect_uri parameter");
    };

    let Some(code_challenge) = params.code_challenge.clone() else {
        return error_redirect(target, "code_challenge is required", params.state.as_deref());
    };
    let method = match params.code_challenge_method.as_deref() {
        None => ChallengeMethod::Plain,
        Some(m) => match m.parse::<ChallengeMethod>() {
            Ok(method) => method,
            Err(e) => return error_redirect(target, &e, params.state.as_deref()),
        },
    };

    if api_key.is_empty() {
        return AuthorizeOutcome::RenderForm {
            params,
            error: Some("API key is required".to_string()),
        };
    }

    if let Err(rejection) = oauth.keys.validate(api_key).await {
        info!(key = %preview(api_key), reason = %rejection, "Authorization rejected");
        return AuthorizeOutcome::RenderForm {
            params,
            error: Some(rejection.to_string()),
        };
    }

    let code = oauth.codes.issue(CodeGrant {
        client_id: params.client_id.clone(),
        redirect_uri,
        code_challenge,
        code_challenge_method: method,
        api_key: api_key.to_string(),
        scope: params
            .scope
            .clone()
            .unwrap_or_else(|| oauth.config.default_scope.clone()),
        resource: params.resource.clone(),
    });

    {
        let mut query = target.query_pairs_mut();
        query.append_pair("code", &code);
        if let Some(state) = params.state.as_deref() {
            query.append_pair("state", state);
        }
    }
    info!(
        key = %preview(api_key),
        client_id = params.client_id.as_deref().unwrap_or("-"),
        "Authorization granted"
    );
    AuthorizeOutcome::Redirect(target.into())
}

fn error_redirect(mut target: Url, description: &str, state: Option<&str>) -> AuthorizeOutcome {
    {
        let mut query = target.query_pairs_mut();
        query.append_pair("error", "invalid_request");
        query.append_pair("error_description", description);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    AuthorizeOutcome::Redirect(target.into())
}

// ── Token ─────────────────────────────────────────────────────────────────

/// Token request body (form-encoded or JSON).
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be `authorization_code`
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Code from the redirect
    #[serde(default)]
    pub code: Option<String>,
    /// PKCE verifier
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Redirect URI used at authorization
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client identifier (accepted, not verified)
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Successful token response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The API key
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Advisory lifetime in seconds
    pub expires_in: u64,
    /// Granted scope
    pub scope: String,
}

/// `POST /token`: redeem an authorization code.
async fn token(
    State(oauth): State<Arc<OAuthServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match parse_token_request(&headers, &body).and_then(|req| exchange_code(&oauth, &req)) {
        Ok(response) => (
            StatusCode::OK,
            [(header::CACHE_CONTROL, "no-store")],
            Json(response),
        )
            .into_response(),
        Err(err) => {
            debug!(error = %err, "Token request rejected");
            err.into_response()
        }
    }
}

fn parse_token_request(headers: &HeaderMap, body: &[u8]) -> Result<TokenRequest, OAuthError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        serde_json::from_slice(body)
            .map_err(|_| OAuthError::InvalidRequest("Malformed JSON body".into()))
    } else {
        serde_urlencoded::from_bytes(body)
            .map_err(|_| OAuthError::InvalidRequest("Malformed form body".into()))
    }
}

fn exchange_code(oauth: &OAuthServer, req: &TokenRequest) -> Result<TokenResponse, OAuthError> {
    if req.grant_type.as_deref() != Some("authorization_code") {
        return Err(OAuthError::UnsupportedGrantType(
            "Only authorization_code grant type is supported".into(),
        ));
    }

    let code = req.code.as_deref().filter(|c| !c.is_empty());
    let verifier = req.code_verifier.as_deref().filter(|v| !v.is_empty());
    let (Some(code), Some(verifier)) = (code, verifier) else {
        return Err(OAuthError::InvalidRequest(
            "code and code_verifier are required".into(),
        ));
    };

    let redirect_uri = req.redirect_uri.as_deref().filter(|r| !r.is_empty());
    let redemption = oauth.codes.redeem(code, verifier, redirect_uri)?;

    info!(
        key = %preview(&redemption.api_key),
        client_id = req.client_id.as_deref().unwrap_or("-"),
        "Issued access token"
    );
    Ok(TokenResponse {
        access_token: redemption.api_key,
        token_type: "Bearer".to_string(),
        expires_in: oauth.config.token_expires_in,
        scope: redemption.scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OAuthConfig, ServerConfig, TierLimits};
    use crate::keys::{ApiKeyData, JsonKeyStore, Tier};
    use crate::oauth::pkce;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    async fn oauth() -> OAuthServer {
        let store = JsonKeyStore::in_memory(TierLimits::default());
        store
            .insert("sk_test_valid", ApiKeyData::new("acme", Tier::Pro))
            .await
            .unwrap();
        OAuthServer::new(Arc::new(store), OAuthConfig::default(), ServerConfig::default())
    }

    fn params() -> AuthorizeParams {
        AuthorizeParams {
            redirect_uri: Some("https://client.example/cb".into()),
            state: Some("xyz".into()),
            code_challenge: Some(CHALLENGE.into()),
            code_challenge_method: Some("S256".into()),
            ..Default::default()
        }
    }

    fn code_from(location: &str) -> String {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn begin_requires_redirect_uri() {
        let oauth = oauth().await;
        let outcome = begin_authorization(&oauth, AuthorizeParams::default());
        assert!(matches!(outcome, AuthorizeOutcome::BadRequest(_)));
    }

    #[tokio::test]
    async fn begin_strict_rejects_unregistered_redirect() {
        let mut oauth = oauth().await;
        oauth.config.strict_redirect_uris = true;
        oauth.clients.register(RegistrationRequest {
            client_id: Some("c1".into()),
            redirect_uris: Some(vec!["https://other.example/cb".into()]),
            ..Default::default()
        });
        let outcome = begin_authorization(
            &oauth,
            AuthorizeParams {
                client_id: Some("c1".into()),
                ..params()
            },
        );
        assert!(matches!(outcome, AuthorizeOutcome::BadRequest(_)));
    }

    #[tokio::test]
    async fn begin_lenient_renders_form_for_unregistered_redirect() {
        let oauth = oauth().await;
        oauth.clients.register(RegistrationRequest {
            client_id: Some("c1".into()),
            redirect_uris: Some(vec!["https://other.example/cb".into()]),
            ..Default::default()
        });
        let outcome = begin_authorization(
            &oauth,
            AuthorizeParams {
                client_id: Some("c1".into()),
                ..params()
            },
        );
        assert!(matches!(outcome, AuthorizeOutcome::RenderForm { error: None, .. }));
    }

    #[tokio::test]
    async fn submit_invalid_key_rerenders_with_params() {
        let oauth = oauth().await;
        let outcome = submit_authorization(&oauth, "sk_wrong", params()).await;
        match outcome {
            AuthorizeOutcome::RenderForm { params: kept, error } => {
                assert_eq!(error.as_deref(), Some("Invalid API key"));
                assert_eq!(kept, params());
            }
            other => panic!("expected form, got {other:?}"),
        }
        assert!(oauth.codes.is_empty());
    }

    #[tokio::test]
    async fn submit_empty_key_rerenders() {
        let oauth = oauth().await;
        let outcome = submit_authorization(&oauth, "", params()).await;
        assert!(matches!(
            outcome,
            AuthorizeOutcome::RenderForm { error: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn submit_without_challenge_redirects_with_error() {
        let oauth = oauth().await;
        let outcome = submit_authorization(
            &oauth,
            "sk_test_valid",
            AuthorizeParams {
                code_challenge: None,
                ..params()
            },
        )
        .await;
        let AuthorizeOutcome::Redirect(location) = outcome else {
            panic!("expected redirect");
        };
        assert!(location.starts_with("https://client.example/cb?error=invalid_request"));
        assert!(location.contains("state=xyz"));
        assert!(oauth.codes.is_empty());
    }

    #[tokio::test]
    async fn submit_unsupported_method_redirects_with_error() {
        let oauth = oauth().await;
        let outcome = submit_authorization(
            &oauth,
            "sk_test_valid",
            AuthorizeParams {
                code_challenge_method: Some("RS256".into()),
                ..params()
            },
        )
        .await;
        assert!(matches!(outcome, AuthorizeOutcome::Redirect(l) if l.contains("error=invalid_request")));
    }

    #[tokio::test]
    async fn full_exchange_returns_api_key() {
        // GIVEN: a successful authorization
        let oauth = oauth().await;
        let AuthorizeOutcome::Redirect(location) =
            submit_authorization(&oauth, "sk_test_valid", params()).await
        else {
            panic!("expected redirect");
        };
        assert!(location.contains("state=xyz"));
        let code = code_from(&location);

        // WHEN: the code is exchanged with the verifier
        let response = exchange_code(
            &oauth,
            &TokenRequest {
                grant_type: Some("authorization_code".into()),
                code: Some(code.clone()),
                code_verifier: Some(VERIFIER.into()),
                ..Default::default()
            },
        )
        .unwrap();

        // THEN: the API key is the access token, and the code is spent
        assert_eq!(response.access_token, "sk_test_valid");
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 86_400);
        assert_eq!(response.scope, "mcp:tools");
        let replay = exchange_code(
            &oauth,
            &TokenRequest {
                grant_type: Some("authorization_code".into()),
                code: Some(code),
                code_verifier: Some(VERIFIER.into()),
                ..Default::default()
            },
        );
        assert_eq!(
            replay.unwrap_err(),
            OAuthError::InvalidGrant("Authorization code not found or expired".into())
        );
    }

    #[tokio::test]
    async fn plain_method_defaults_when_absent() {
        let oauth = oauth().await;
        let verifier = pkce::generate_verifier();
        let AuthorizeOutcome::Redirect(location) = submit_authorization(
            &oauth,
            "sk_test_valid",
            AuthorizeParams {
                code_challenge: Some(verifier.clone()),
                code_challenge_method: None,
                ..params()
            },
        )
        .await
        else {
            panic!("expected redirect");
        };
        let response = exchange_code(
            &oauth,
            &TokenRequest {
                grant_type: Some("authorization_code".into()),
                code: Some(code_from(&location)),
                code_verifier: Some(verifier),
                ..Default::default()
            },
        );
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn exchange_rejects_wrong_grant_type() {
        let oauth = oauth().await;
        let err = exchange_code(
            &oauth,
            &TokenRequest {
                grant_type: Some("refresh_token".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "unsupported_grant_type");
    }

    #[tokio::test]
    async fn exchange_requires_code_and_verifier() {
        let oauth = oauth().await;
        let err = exchange_code(
            &oauth,
            &TokenRequest {
                grant_type: Some("authorization_code".into()),
                code: Some("abc".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn token_request_parses_form_and_json() {
        let mut headers = HeaderMap::new();
        let form = parse_token_request(&headers, b"grant_type=authorization_code&code=c1").unwrap();
        assert_eq!(form.code.as_deref(), Some("c1"));

        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let json = parse_token_request(&headers, br#"{"grant_type":"authorization_code","code":"c2"}"#)
            .unwrap();
        assert_eq!(json.code.as_deref(), Some("c2"));

        let err = parse_token_request(&headers, b"{oops").unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }
}
