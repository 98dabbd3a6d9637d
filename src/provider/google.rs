//! Google Gemini `generateContent` backend.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatModel, ContentPart, Message, ProviderError, Role};
use crate::error::is_auth_failure;

const GENERATE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GoogleClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GoogleClient {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for GoogleClient {
    fn name(&self) -> &str {
        "google"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for message in messages {
            let parts: Vec<WirePart> = message.parts.iter().map(WirePart::from).collect();
            match message.role {
                Role::System => system_instruction = Some(WireContent { role: None, parts }),
                Role::User => contents.push(WireContent {
                    role: Some("user"),
                    parts,
                }),
            }
        }

        let request = GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 4000,
            },
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            GENERATE_URL, self.model, self.api_key
        );

        debug!("google: sending generateContent request (model={})", self.model);

        let response = self
            .client
            .post(&url)
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

        let completion: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        completion
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| ProviderError::Parse("response contained no candidates".to_string()))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData", rename_all = "camelCase")]
    InlineData { mime_type: String, data: String },
}

impl From<&ContentPart> for WirePart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => WirePart::Text(text.clone()),
            ContentPart::Image { media_type, data } => WirePart::InlineData {
                mime_type: media_type.clone(),
                data: data.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
