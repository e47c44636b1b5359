use thiserror::Error;

/// Reasons a credential fails to decode.
///
/// `Expired` and `BadSignature` are distinct causes: an expired credential
/// signed with a known key is never reported as a signature failure, and an
/// expiry failure never triggers a retry against another key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential is malformed: {0}")]
    Malformed(String),

    #[error("credential signature does not match any signing key")]
    BadSignature,

    #[error("credential expired")]
    Expired,

    #[error("credential kind mismatch: expected {expected}, found {found}")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    #[error("credential has no subject")]
    MissingSubject,

    #[error("failed to encode credential: {0}")]
    Encoding(String),
}

/// Errors from the credential issuance surface.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity assertion rejected: {0}")]
    InvalidAssertion(String),

    #[error("identity is not on the allowlist")]
    NotAllowlisted,

    #[error("identity provider unavailable: {0}")]
    Upstream(String),

    #[error("invalid signing key ring: {0}")]
    InvalidKeyRing(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}
