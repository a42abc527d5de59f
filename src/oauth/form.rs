//! Credential-entry page for `/authorize`.
//!
//! The page carries every OAuth parameter as a hidden field, so the POST to
//! `/authorize/submit` is self-contained and nothing is stored between the two.

use serde::{Deserialize, Serialize};

/// OAuth parameters of one authorization attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeParams {
    /// Requested response type (only `code` is meaningful)
    #[serde(default)]
    pub response_type: Option<String>,
    /// Client identifier
    #[serde(default)]
    pub client_id: Option<String>,
    /// Where to send the code
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Opaque client state, echoed back
    #[serde(default)]
    pub state: Option<String>,
    /// PKCE challenge
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// PKCE method (`S256` or `plain`)
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
    /// RFC 8707 resource indicator
    #[serde(default)]
    pub resource: Option<String>,
}

impl AuthorizeParams {
    /// Redirect URI, if present and non-empty
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        non_empty(self.redirect_uri.as_deref())
    }

    fn hidden_fields(&self) -> [(&'static str, &str); 8] {
        [
            ("response_type", self.response_type.as_deref().unwrap_or("code")),
            ("client_id", self.client_id.as_deref().unwrap_or_default()),
            ("redirect_uri", self.redirect_uri.as_deref().unwrap_or_default()),
            ("state", self.state.as_deref().unwrap_or_default()),
            ("code_challenge", self.code_challenge.as_deref().unwrap_or_default()),
            (
                "code_challenge_method",
                self.code_challenge_method.as_deref().unwrap_or_default(),
            ),
            ("scope", self.scope.as_deref().unwrap_or_default()),
            ("resource", self.resource.as_deref().unwrap_or_default()),
        ]
    }
}

/// Body of `POST /authorize/submit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitForm {
    /// The credential typed by the user
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    response_type: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code_challenge: Option<String>,
    #[serde(default)]
    code_challenge_method: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    resource: Option<String>,
}

impl SubmitForm {
    /// Split into the credential and the carried OAuth parameters.
    ///
    /// Empty hidden fields come back as `None`.
    #[must_use]
    pub fn into_parts(self) -> (String, AuthorizeParams) {
        let clean = |v: Option<String>| v.filter(|s| !s.is_empty());
        (
            self.api_key.trim().to_string(),
            AuthorizeParams {
                response_type: clean(self.response_type),
                client_id: clean(self.client_id),
                redirect_uri: clean(self.redirect_uri),
                state: clean(self.state),
                code_challenge: clean(self.code_challenge),
                code_challenge_method: clean(self.code_challenge_method),
                scope: clean(self.scope),
                resource: clean(self.resource),
            },
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Render the credential form, optionally with an inline error.
#[must_use]
pub fn render_login_page(params: &AuthorizeParams, error: Option<&str>) -> String {
    let hidden: String = params
        .hidden_fields()
        .iter()
        .map(|(name, value)| {
            format!(
                r#"      <input type="hidden" name="{name}" value="{}">"#,
                html_escape(value)
            ) + "\n"
        })
        .collect();

    let error_block = error.map_or_else(String::new, |msg| {
        format!(
            r#"    <p class="error" role="alert">{}</p>"#,
            html_escape(msg)
        ) + "\n"
    });

    let client = params
        .client_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .map_or_else(|| "An application".to_string(), html_escape);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Authorize access</title>
  <style>
    body {{ font-family: system-ui, sans-serif; max-width: 28rem; margin: 4rem auto; padding: 0 1rem; }}
    input[type=password] {{ width: 100%; padding: .5rem; box-sizing: border-box; }}
    button {{ margin-top: 1rem; padding: .5rem 1.5rem; }}
    .error {{ color: #b00020; }}
  </style>
</head>
<body>
  <main>
    <h1>Authorize access</h1>
    <p>{client} is requesting access to the analysis tools. Enter your API key to continue.</p>
{error_block}    <form method="post" action="/authorize/submit">
{hidden}      <label for="api_key">API key</label>
      <input type="password" id="api_key" name="api_key" autocomplete="off" required>
      <button type="submit">Authorize</button>
    </form>
  </main>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AuthorizeParams {
        AuthorizeParams {
            client_id: Some("client-1".into()),
            redirect_uri: Some("https://client.example/cb".into()),
            state: Some("xyz".into()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            code_challenge_method: Some("S256".into()),
            scope: Some("mcp:tools".into()),
            ..Default::default()
        }
    }

    #[test]
    fn page_embeds_hidden_fields() {
        let html = render_login_page(&params(), None);
        assert!(html.contains(r#"name="redirect_uri" value="https://client.example/cb""#));
        assert!(html.contains(r#"name="state" value="xyz""#));
        assert!(html.contains(r#"name="code_challenge_method" value="S256""#));
        assert!(html.contains(r#"name="response_type" value="code""#));
        assert!(!html.contains("class=\"error\""));
    }

    #[test]
    fn page_shows_escaped_error() {
        let html = render_login_page(&params(), Some("Invalid API key"));
        assert!(html.contains("Invalid API key"));

        let html = render_login_page(&params(), Some("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn hidden_values_are_escaped() {
        let hostile = AuthorizeParams {
            state: Some(r#""><script>alert(1)</script>"#.into()),
            ..params()
        };
        let html = render_login_page(&hostile, None);
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn submit_form_splits_and_cleans() {
        let form: SubmitForm = serde_urlencoded::from_str(
            "api_key=+sk_test_valid+&redirect_uri=https%3A%2F%2Fclient.example%2Fcb&state=&scope=mcp%3Atools",
        )
        .unwrap();
        let (key, params) = form.into_parts();
        assert_eq!(key, "sk_test_valid");
        assert_eq!(params.redirect_uri(), Some("https://client.example/cb"));
        assert_eq!(params.state, None);
        assert_eq!(params.scope.as_deref(), Some("mcp:tools"));
    }
}
