//! Anthropic Messages API backend.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatModel, ContentPart, Message, ProviderError, Role};
use crate::error::is_auth_failure;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        // The Messages API takes the system prompt as a top-level field.
        let mut system = None;
        let mut wire_messages = Vec::new();

        for message in messages {
            match message.role {
                Role::System => {
                    if let Some(ContentPart::Text { text }) = message.parts.first() {
                        system = Some(text.clone());
                    }
                }
                Role::User => wire_messages.push(WireMessage {
                    role: "user",
                    content: message.parts.iter().map(WireBlock::from).collect(),
                }),
            }
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4000,
            temperature: 0.1,
            system,
            messages: wire_messages,
        };

        debug!("anthropic: sending messages request (model={})", self.model);

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_auth_failure(status.as_u16(), &body) {
                return Err(ProviderError::Auth(format!("{} ({})", body, status)));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let completion: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        completion
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ProviderError::Parse("response contained no text block".to_string()))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

impl From<&ContentPart> for WireBlock {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => WireBlock::Text { text: text.clone() },
            ContentPart::Image { media_type, data } => WireBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}
