//! Signing and verification of bearer credentials.
//!
//! Credentials are compact HS256 JWS tokens:
//! `base64url(header).base64url(claims).base64url(hmac_sha256)`.
//! Any standard JWT library configured with the same secret can verify them.

use crate::error::CredentialError;
use crate::keyring::{KeyRing, SigningSecret};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const HEADER_ALG: &str = "HS256";

/// Declared purpose of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Short-lived; opens sessions and authorizes `/auth/me`.
    Access,
    /// Long-lived; only exchangeable for a new access credential.
    Refresh,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// The identity a credential asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject identifier (e-mail address).
    pub subject: String,
    /// Display name; empty when unknown.
    pub name: String,
    /// Avatar URL.
    pub picture: Option<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            name: String::new(),
            picture: None,
        }
    }
}

/// Wire claims carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Encodes and decodes credentials against a shared [`KeyRing`].
///
/// Stateless apart from the ring handle; cloning is cheap.
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    keys: KeyRing,
}

impl CredentialCodec {
    pub fn new(keys: KeyRing) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Signs a credential for `identity` that expires `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Encoding`] if the claims cannot be serialized.
    pub fn encode(
        &self,
        identity: &Identity,
        kind: CredentialKind,
        ttl: Duration,
    ) -> Result<String, CredentialError> {
        self.encode_at(identity, kind, ttl, now_unix())
    }

    /// Like [`encode`](Self::encode) with an explicit issue instant (Unix seconds).
    pub fn encode_at(
        &self,
        identity: &Identity,
        kind: CredentialKind,
        ttl: Duration,
        issued_at: i64,
    ) -> Result<String, CredentialError> {
        // Refresh credentials carry only the subject.
        let (name, picture) = match kind {
            CredentialKind::Access => (identity.name.clone(), identity.picture.clone()),
            CredentialKind::Refresh => (String::new(), None),
        };
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: Some(identity.subject.clone()),
            name,
            picture,
            kind: kind.as_str().to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl_secs),
        };

        let header = Header {
            alg: HEADER_ALG.to_string(),
            typ: Some("JWT".to_string()),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| CredentialError::Encoding(e.to_string()))?;
        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| CredentialError::Encoding(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let ring = self.keys.snapshot();
        let signature = sign(ring.current(), signing_input.as_bytes());

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verifies `token` and returns the identity it asserts.
    ///
    /// Checks run in a fixed order: signature (current secret, then previous
    /// on mismatch only), expiry, kind, subject.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a [`CredentialError`].
    pub fn decode(&self, token: &str, expected: CredentialKind) -> Result<Identity, CredentialError> {
        self.decode_at(token, expected, now_unix())
    }

    /// Like [`decode`](Self::decode) evaluated at `now` (Unix seconds).
    pub fn decode_at(
        &self,
        token: &str,
        expected: CredentialKind,
        now: i64,
    ) -> Result<Identity, CredentialError> {
        let claims = self.verified_claims(token)?;

        if now >= claims.exp {
            return Err(CredentialError::Expired);
        }

        if claims.kind != expected.as_str() {
            return Err(CredentialError::WrongKind {
                expected: expected.as_str(),
                found: claims.kind,
            });
        }

        let subject = match claims.sub {
            Some(sub) if !sub.trim().is_empty() => sub,
            _ => return Err(CredentialError::MissingSubject),
        };

        Ok(Identity {
            subject,
            name: claims.name,
            picture: claims.picture,
        })
    }

    /// Splits the token, checks the signature, and parses the claims. Expiry
    /// is not evaluated here.
    fn verified_claims(&self, token: &str) -> Result<Claims, CredentialError> {
        let mut parts = token.trim().split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => {
                    return Err(CredentialError::Malformed(
                        "expected three dot-separated segments".to_string(),
                    ))
                }
            };

        let header: Header = decode_segment(header_b64, "header")?;
        if header.alg != HEADER_ALG {
            return Err(CredentialError::Malformed(format!(
                "unsupported algorithm {}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| CredentialError::Malformed(format!("signature: {}", e)))?;

        let signing_input = &token.trim()[..header_b64.len() + 1 + claims_b64.len()];
        let ring = self.keys.snapshot();
        let verified = verify(ring.current(), signing_input.as_bytes(), &signature)
            || ring
                .previous()
                .is_some_and(|prev| verify(prev, signing_input.as_bytes(), &signature));
        if !verified {
            return Err(CredentialError::BadSignature);
        }

        decode_segment(claims_b64, "claims")
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(
    segment: &str,
    what: &str,
) -> Result<T, CredentialError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CredentialError::Malformed(format!("{}: {}", what, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| CredentialError::Malformed(format!("{}: {}", what, e)))
}

fn sign(secret: &SigningSecret, input: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

fn verify(secret: &SigningSecret, input: &[u8], signature: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(input);
    mac.verify_slice(signature).is_ok()
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
