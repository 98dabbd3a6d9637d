//! OpenAI-compatible chat-completions backend.
//!
//! Covers every provider that speaks the `/chat/completions` wire format;
//! only the endpoint and bearer token differ per provider.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ChatModel, ContentPart, Message, ProviderError, Role};
use crate::error::is_auth_failure;

/// Chat-completions endpoints per provider id.
fn endpoint_for(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1/chat/completions"),
        "deepseek" => Some("https://api.deepseek.com/v1/chat/completions"),
        "meta" => Some("https://api.llama-api.com/chat/completions"),
        "mistral" => Some("https://api.mistral.ai/v1/chat/completions"),
        "groq" => Some("https://api.groq.com/openai/v1/chat/completions"),
        "together" => Some("https://api.together.xyz/v1/chat/completions"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1/chat/completions"),
        "nvidia" => Some("https://api.nvcf.nvidia.com/v2/nvcf/pexec/functions"),
        _ => None,
    }
}

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    provider: String,
    endpoint: &'static str,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        provider: &str,
        api_key: &str,
        model: &str,
    ) -> Result<Self, ProviderError> {
        let endpoint = endpoint_for(provider).ok_or_else(|| ProviderError::Api {
            status: 0,
            message: format!("Endpoint not configured for provider: {}", provider),
        })?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            endpoint,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: 0.1,
            max_tokens: 4000,
            // Only OpenAI and DeepSeek accept the json_object response format.
            response_format: matches!(self.provider.as_str(), "openai" | "deepseek")
                .then(|| ResponseFormat { format_type: "json_object".to_string() }),
        };

        debug!("{}: sending chat completion (model={})", self.provider, self.model);

        let response = self
            .client
            .post(self.endpoint)
            .bearer_auth(&self.api_key)
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

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(usage) = completion.usage {
            info!(
                "{}: {} tokens (prompt: {}, completion: {})",
                self.provider, usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
        };

        // Collapse a lone text part into the plain-string form every
        // OpenAI-compatible endpoint accepts; multi-part needs the array form.
        let content = match message.parts.as_slice() {
            [ContentPart::Text { text }] => WireContent::Text(text.clone()),
            parts => WireContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => WirePart::Text { text: text.clone() },
                        ContentPart::Image { media_type, data } => WirePart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{};base64,{}", media_type, data),
                            },
                        },
                    })
                    .collect(),
            ),
        };

        WireMessage { role, content }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_have_endpoints() {
        for provider in ["openai", "deepseek", "meta", "mistral", "groq", "together", "fireworks", "nvidia"] {
            assert!(endpoint_for(provider).is_some(), "missing endpoint for {}", provider);
        }
        assert!(endpoint_for("anthropic").is_none());
    }

    #[test]
    fn lone_text_serializes_as_string() {
        let wire = WireMessage::from(&Message::user("olá"));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["content"], "olá");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn image_part_becomes_data_url() {
        let msg = Message {
            role: Role::User,
            parts: vec![
                ContentPart::Text { text: "veja".to_string() },
                ContentPart::Image {
                    media_type: "image/png".to_string(),
                    data: "QUJD".to_string(),
                },
            ],
        };
        let json = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,QUJD");
    }
}
