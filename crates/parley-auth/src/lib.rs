//! Credential plane for Parley.
//!
//! Issues and verifies short-lived HS256 bearer credentials against a
//! rotating key ring, gates issuance behind an identity allowlist, and
//! defines the contract for the third-party identity assertion verifier
//! (Google ID tokens in production).
//!
//! The key ring is the only piece of state shared across sessions. It is held
//! as an immutable [`SigningKeyRing`] value behind a [`KeyRing`] handle whose
//! contents are replaced wholesale, so a verifier never observes a
//! half-rotated ring.

pub mod allowlist;
pub mod assertion;
pub mod credential;
pub mod error;
pub mod keyring;

pub use allowlist::Allowlist;
pub use assertion::{AssertedIdentity, AssertionVerifier, GoogleAssertionVerifier};
pub use credential::{Claims, CredentialCodec, CredentialKind, Identity};
pub use error::{AuthError, CredentialError};
pub use keyring::{KeyRing, SigningKeyRing, SigningSecret};
