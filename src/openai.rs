//! OpenAI chat-completions client for vision comparisons.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Token counts reported by the model endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Text answer plus usage for one completion.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// Failure talking to the model endpoint. Status codes are kept so the
/// caller can tell quota, auth and rate-limit failures apart.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("OpenAI API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to send request to OpenAI: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to parse OpenAI response: {0}")]
    Decode(String),
}

/// Anything that can answer a chat request. The credential is passed per
/// call so the backend itself holds no secrets.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        api_key: &str,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<ChatReply, ChatError>;
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(endpoint: impl Into<String>, max_tokens: u32, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn chat(
        &self,
        api_key: &str,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<ChatReply, ChatError> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            max_tokens: Some(self.max_tokens),
        };

        debug!("Sending request to OpenAI: model={}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let response: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| ChatError::Decode(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        info!(
            "OpenAI response: {} tokens (prompt: {}, completion: {})",
            response.usage.total_tokens,
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );

        Ok(ChatReply {
            text,
            usage: TokenUsage {
                input: response.usage.prompt_tokens,
                output: response.usage.completion_tokens,
            },
        })
    }
}

/// Pull `error.message` out of an OpenAI error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

/// Vision detail hint. Slips are always sent at full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    High,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with one text part followed by images, in order.
    /// Each image is `(mime_type, bytes)` and is sent inline as a data URL.
    pub fn user_with_images<'a>(
        text: impl Into<String>,
        images: impl IntoIterator<Item = (&'a str, &'a [u8])>,
        detail: ImageDetail,
    ) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];

        for (mime_type, data) in images {
            let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(data));
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: data_url,
                    detail: Some(detail),
                },
            });
        }

        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}
