//! Text generation through the Anthropic Messages API.

use crate::config::GenerationConfig;
use crate::error::VoiceError;
use crate::pipeline::Responder;
use async_trait::async_trait;
use parley_types::{Role, Turn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Timeout for one generation request.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Generates conversational replies with Claude.
#[derive(Clone)]
pub struct ClaudeResponder {
    client: Client,
    config: GenerationConfig,
}

impl ClaudeResponder {
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the HTTP client cannot be built.
    pub fn new(config: GenerationConfig) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_request(&self, body: &CreateMessageRequest<'_>) -> Result<String, VoiceError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| VoiceError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&body_text)
                .map(|wrapper| wrapper.error.message)
                .unwrap_or(body_text);
            return Err(VoiceError::Generation(format!("API returned {}: {}", status, message)));
        }

        let parsed: CreateMessageResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Generation(format!("failed to parse response: {}", e)))?;

        extract_text(parsed)
    }
}

#[async_trait]
impl Responder for ClaudeResponder {
    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, VoiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::Generation("user message is empty".to_string()));
        }
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Generation("API key is not configured".to_string()));
        }

        let request = CreateMessageRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: build_messages(text, history),
        };

        tracing::debug!(
            model = %self.config.model,
            turns = request.messages.len(),
            "sending generation request"
        );
        self.send_request(&request).await
    }
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlockResponse>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlockResponse {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// History plus the new user turn. The API requires the first message to
/// come from the user, so assistant turns left at the front by eviction are
/// skipped.
fn build_messages<'a>(text: &'a str, history: &'a [Turn]) -> Vec<Message<'a>> {
    history
        .iter()
        .skip_while(|turn| turn.role != Role::User)
        .map(|turn| Message {
            role: turn.role.as_str(),
            content: &turn.content,
        })
        .chain(std::iter::once(Message {
            role: Role::User.as_str(),
            content: text,
        }))
        .collect()
}

fn extract_text(response: CreateMessageResponse) -> Result<String, VoiceError> {
    response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlockResponse::Text { text } => Some(text),
            ContentBlockResponse::Other => None,
        })
        .ok_or_else(|| VoiceError::Generation("response contained no text".to_string()))
}
