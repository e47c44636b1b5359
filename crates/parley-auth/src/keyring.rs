//! Signing secrets and the hot-swappable key ring.

use crate::error::AuthError;
use std::fmt;
use std::sync::{Arc, RwLock};

/// An HMAC signing secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Wraps raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyRing`] if the secret is empty.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, AuthError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AuthError::InvalidKeyRing(
                "signing secret cannot be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret([REDACTED])")
    }
}

/// The set of secrets used for signing and verification.
///
/// Encoding always uses `current`. `previous` is only consulted by
/// verification, and only after `current` produced a signature mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyRing {
    current: SigningSecret,
    previous: Option<SigningSecret>,
}

impl SigningKeyRing {
    pub fn new(current: SigningSecret, previous: Option<SigningSecret>) -> Self {
        Self { current, previous }
    }

    /// Builds a ring from configured secret strings. A blank `previous` is
    /// treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeyRing`] if `current` is blank.
    pub fn from_secrets(current: &str, previous: Option<&str>) -> Result<Self, AuthError> {
        let current = SigningSecret::new(current.trim().as_bytes())?;
        let previous = match previous.map(str::trim) {
            Some(p) if !p.is_empty() => Some(SigningSecret::new(p.as_bytes())?),
            _ => None,
        };
        Ok(Self::new(current, previous))
    }

    pub fn current(&self) -> &SigningSecret {
        &self.current
    }

    pub fn previous(&self) -> Option<&SigningSecret> {
        self.previous.as_ref()
    }
}

/// Shared handle to the active [`SigningKeyRing`].
///
/// Readers take an `Arc` snapshot; writers replace the whole value. The lock
/// is only held for the pointer copy, never across an `.await`.
#[derive(Debug, Clone)]
pub struct KeyRing {
    inner: Arc<RwLock<Arc<SigningKeyRing>>>,
}

impl KeyRing {
    pub fn new(ring: SigningKeyRing) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(ring))),
        }
    }

    /// Returns the ring as of now. Later rotations do not affect the snapshot.
    pub fn snapshot(&self) -> Arc<SigningKeyRing> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                // A writer panicked mid-swap; the stored Arc is still a whole value.
                tracing::error!("key ring lock poisoned, recovering last installed ring");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Installs `ring` as the active ring.
    pub fn replace(&self, ring: SigningKeyRing) {
        self.update(|_| ring);
        tracing::info!("signing key ring replaced");
    }

    /// Makes `new_current` the signing secret and keeps the old current
    /// secret as the verification-only previous secret.
    pub fn rotate(&self, new_current: SigningSecret) {
        self.update(|old| SigningKeyRing::new(new_current, Some(old.current.clone())));
        tracing::info!("signing key ring rotated");
    }

    /// Drops the previous secret once its grace period is over.
    pub fn retire_previous(&self) {
        self.update(|old| SigningKeyRing::new(old.current.clone(), None));
        tracing::info!("previous signing secret retired");
    }

    /// Derives the next ring from the installed one under a single write lock.
    fn update(&self, next: impl FnOnce(&SigningKeyRing) -> SigningKeyRing) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ring = Arc::new(next(&**guard));
        *guard = ring;
    }
}
