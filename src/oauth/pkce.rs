//! PKCE (Proof Key for Code Exchange, RFC 7636)

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// How the code challenge was derived from the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`
    S256,
    /// Challenge equals the verifier
    #[serde(rename = "plain")]
    Plain,
}

impl ChallengeMethod {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            other => Err(format!("unsupported code_challenge_method '{other}'")),
        }
    }
}

/// Derive the challenge for `verifier` under `method`.
#[must_use]
pub fn compute_challenge(verifier: &str, method: ChallengeMethod) -> String {
    match method {
        ChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        ChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Check a verifier against a stored challenge in constant time.
#[must_use]
pub fn verify(verifier: &str, challenge: &str, method: ChallengeMethod) -> bool {
    let computed = compute_challenge(verifier, method);
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Generate a random 43-character verifier.
#[must_use]
pub fn generate_verifier() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn s256_matches_rfc_vector() {
        assert_eq!(
            compute_challenge(RFC_VERIFIER, ChallengeMethod::S256),
            RFC_CHALLENGE
        );
        assert!(verify(RFC_VERIFIER, RFC_CHALLENGE, ChallengeMethod::S256));
    }

    #[test]
    fn s256_rejects_wrong_verifier() {
        assert!(!verify("wrong_verifier", RFC_CHALLENGE, ChallengeMethod::S256));
        // The challenge itself is not a valid verifier under S256
        assert!(!verify(RFC_CHALLENGE, RFC_CHALLENGE, ChallengeMethod::S256));
    }

    #[test]
    fn plain_compares_verbatim() {
        assert!(verify("abc123", "abc123", ChallengeMethod::Plain));
        assert!(!verify("abc123", "abc124", ChallengeMethod::Plain));
        assert!(!verify("abc", "abc123", ChallengeMethod::Plain));
    }

    #[test]
    fn method_parsing_is_exact() {
        assert_eq!("S256".parse::<ChallengeMethod>().unwrap(), ChallengeMethod::S256);
        assert_eq!("plain".parse::<ChallengeMethod>().unwrap(), ChallengeMethod::Plain);
        assert!("s256".parse::<ChallengeMethod>().is_err());
        assert!("RS256".parse::<ChallengeMethod>().is_err());
    }

    #[test]
    fn generated_verifiers_are_unique_and_verifiable() {
        let a = generate_verifier();
        let b = generate_verifier();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        let challenge = compute_challenge(&a, ChallengeMethod::S256);
        assert!(verify(&a, &challenge, ChallengeMethod::S256));
    }
}
