//! Authorization code engine.
//!
//! Codes are single-use: [`CodeEngine::redeem`] removes the entry before any
//! check runs, so a failed or expired redemption still burns the code and two
//! concurrent redemptions can never both succeed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pkce::{self, ChallengeMethod};
use crate::keys::preview;

/// Everything bound to a code at issuance.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    /// Client that started the flow (may be unregistered)
    pub client_id: Option<String>,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// PKCE challenge
    pub code_challenge: String,
    /// PKCE method
    pub code_challenge_method: ChallengeMethod,
    /// The already-validated API key this code stands for
    pub api_key: String,
    /// Granted scope
    pub scope: String,
    /// RFC 8707 resource indicator
    pub resource: Option<String>,
}

#[derive(Debug)]
struct AuthorizationCode {
    grant: CodeGrant,
    expires_at: Instant,
}

impl AuthorizationCode {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    /// The API key handed out as the access token
    pub api_key: String,
    /// Granted scope
    pub scope: String,
    /// Resource indicator, if one was requested
    pub resource: Option<String>,
}

/// Why a code could not be redeemed. Surfaced as `invalid_grant`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    /// Unknown, already used, or swept
    #[error("Authorization code not found or expired")]
    NotFound,
    /// Found but past its TTL
    #[error("Authorization code expired")]
    Expired,
    /// Redirect URI differs from the one used at authorization
    #[error("redirect_uri mismatch")]
    RedirectMismatch,
    /// PKCE verification failed
    #[error("code_verifier does not match code_challenge")]
    VerifierMismatch,
}

/// Issues and redeems short-lived authorization codes.
pub struct CodeEngine {
    codes: DashMap<String, AuthorizationCode>,
    ttl: Duration,
    require_redirect_uri: bool,
}

impl CodeEngine {
    /// Engine whose codes live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: DashMap::new(),
            ttl,
            require_redirect_uri: false,
        }
    }

    /// Treat an absent `redirect_uri` at redemption as a mismatch.
    #[must_use]
    pub fn require_redirect_uri(mut self, required: bool) -> Self {
        self.require_redirect_uri = required;
        self
    }

    /// Store `grant` under a fresh random code and return the code.
    pub fn issue(&self, grant: CodeGrant) -> String {
        let bytes: [u8; 32] = rand::random();
        let code = URL_SAFE_NO_PAD.encode(bytes);
        debug!(
            code = %preview(&code),
            client_id = grant.client_id.as_deref().unwrap_or("-"),
            method = %grant.code_challenge_method,
            "Issued authorization code"
        );
        self.codes.insert(
            code.clone(),
            AuthorizationCode {
                grant,
                expires_at: Instant::now() + self.ttl,
            },
        );
        code
    }

    /// Redeem `code` with its PKCE verifier.
    ///
    /// The code is consumed whatever the outcome.
    pub fn redeem(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<Redemption, RedeemError> {
        let (_, entry) = self.codes.remove(code).ok_or_else(|| {
            debug!(code = %preview(code), "Unknown authorization code");
            RedeemError::NotFound
        })?;

        if entry.is_expired(Instant::now()) {
            debug!(code = %preview(code), "Expired authorization code");
            return Err(RedeemError::Expired);
        }

        match redirect_uri {
            Some(uri) if uri != entry.grant.redirect_uri => {
                warn!(code = %preview(code), "redirect_uri mismatch on token exchange");
                return Err(RedeemError::RedirectMismatch);
            }
            None if self.require_redirect_uri => {
                warn!(code = %preview(code), "redirect_uri missing on token exchange");
                return Err(RedeemError::RedirectMismatch);
            }
            _ => {}
        }

        let grant = entry.grant;
        if !pkce::verify(code_verifier, &grant.code_challenge, grant.code_challenge_method) {
            warn!(
                code = %preview(code),
                method = %grant.code_challenge_method,
                expected = %preview(&grant.code_challenge),
                computed = %preview(&pkce::compute_challenge(code_verifier, grant.code_challenge_method)),
                "PKCE verification failed"
            );
            return Err(RedeemError::VerifierMismatch);
        }

        Ok(Redemption {
            api_key: grant.api_key,
            scope: grant.scope,
            resource: grant.resource,
        })
    }

    /// Drop every expired code. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.codes.len();
        self.codes.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.codes.len())
    }

    /// Number of codes currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` when no codes are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Spawn a background task that sweeps expired codes every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    engine: Arc<CodeEngine>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = engine.sweep_expired();
                    if swept > 0 {
                        debug!(count = swept, "Swept expired authorization codes");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Code sweeper shutting down");
                    break;
                }
            }
        }
    })
}
