//! Third-party identity assertions exchanged for Parley credentials.

use crate::credential::Identity;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Google's token introspection endpoint.
pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Timeout for a single call to the identity provider.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity extracted from a verified third-party assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertedIdentity {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

impl From<AssertedIdentity> for Identity {
    fn from(asserted: AssertedIdentity) -> Self {
        Identity {
            subject: asserted.email,
            name: asserted.name,
            picture: asserted.picture,
        }
    }
}

/// Verifies an identity assertion issued by an external provider.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    /// # Errors
    ///
    /// [`AuthError::InvalidAssertion`] when the provider rejects the assertion
    /// or it lacks an e-mail; [`AuthError::Upstream`] when the provider
    /// cannot be reached.
    async fn verify(&self, assertion: &str) -> Result<AssertedIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Verifies Google ID tokens through the tokeninfo endpoint.
#[derive(Debug, Clone)]
pub struct GoogleAssertionVerifier {
    client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleAssertionVerifier {
    /// # Errors
    ///
    /// Returns [`AuthError::Upstream`] if the HTTP client cannot be built.
    pub fn new(client_id: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_endpoint(client_id, GOOGLE_TOKENINFO_URL)
    }

    /// Points the verifier at a different tokeninfo-compatible endpoint.
    pub fn with_endpoint(
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            client_id: client_id.into(),
            endpoint: endpoint.into(),
        })
    }

    fn check(&self, info: TokenInfo) -> Result<AssertedIdentity, AuthError> {
        if info.aud.as_deref() != Some(self.client_id.as_str()) {
            return Err(AuthError::InvalidAssertion(
                "token audience does not match client id".to_string(),
            ));
        }

        let verified = match &info.email_verified {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        if !verified {
            return Err(AuthError::InvalidAssertion(
                "e-mail address is not verified".to_string(),
            ));
        }

        let email = info
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                AuthError::InvalidAssertion("token does not contain an e-mail".to_string())
            })?;

        Ok(AssertedIdentity {
            email,
            name: info.name.unwrap_or_default(),
            picture: info.picture,
        })
    }
}

#[async_trait]
impl AssertionVerifier for GoogleAssertionVerifier {
    async fn verify(&self, assertion: &str) -> Result<AssertedIdentity, AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::Upstream(
                "google client id is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", assertion)])
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::InvalidAssertion(format!(
                "identity provider rejected token ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "identity provider returned {}",
                status
            )));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("invalid tokeninfo response: {}", e)))?;

        self.check(info)
    }
}
