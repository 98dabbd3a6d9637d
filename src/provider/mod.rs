//! Modular AI provider abstraction.
//!
//! Defines the [`ChatModel`] trait and unified message types so different
//! chat backends (OpenAI-compatible endpoints, Anthropic, Google) can be
//! selected per upload request. The extraction prompt, JSON recovery, and
//! response validation are shared; each backend only shapes the wire call.

pub mod anthropic;
pub mod google;
pub mod openai_compat;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;
use tracing::debug;

use crate::schema::{ProductListResponse, RawProduct};

/// Classified provider-call failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication or credit failure: {0}")]
    Auth(String),
    #[error("provider call timed out")]
    Timeout,
    #[error("provider returned an error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("response was not a valid product list: {0}")]
    Parse(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Classify a reqwest failure (timeouts are surfaced distinctly).
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone)]
pub enum ContentPart {
    Text { text: String },
    /// Base64-encoded image with its mime type; each backend encodes this
    /// into its own wire shape (data URL, source block, inline_data).
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text { text: content.into() }],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text { text: content.into() }],
        }
    }

    /// User message with text plus one attached image.
    pub fn user_with_image(text: impl Into<String>, image_data: &[u8]) -> Self {
        let media_type = match image::guess_format(image_data) {
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            _ => "image/png",
        };
        Self {
            role: Role::User,
            parts: vec![
                ContentPart::Text { text: text.into() },
                ContentPart::Image {
                    media_type: media_type.to_string(),
                    data: BASE64.encode(image_data),
                },
            ],
        }
    }
}

/// Async trait implemented by each chat backend.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError>;
}

/// Build the backend for a provider id. The catalog has already vetted the
/// provider and key format by the time this runs.
pub fn client_for(
    provider: &str,
    api_key: &str,
    model: &str,
    timeout: Duration,
) -> Result<Box<dyn ChatModel>, ProviderError> {
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    match provider {
        "anthropic" => Ok(Box::new(anthropic::AnthropicClient::new(http, api_key, model))),
        "google" => Ok(Box::new(google::GoogleClient::new(http, api_key, model))),
        other => openai_compat::OpenAiCompatClient::new(http, other, api_key, model)
            .map(|c| Box::new(c) as Box<dyn ChatModel>),
    }
}

// ============================================================================
// Extraction prompt and response handling
// ============================================================================

const SYSTEM_PROMPT: &str = "Você é um assistente especializado em extrair dados de produtos de \
documentos de pedidos de venda. Responda APENAS com JSON válido, sem texto adicional.";

/// Content handed to the extraction client for one document.
#[derive(Debug)]
pub enum DocumentInput {
    Text(String),
    /// Raw image bytes for vision-capable models (used when OCR yields
    /// nothing usable).
    Image(Vec<u8>),
}

/// Build the message pair for one extraction call.
pub fn extraction_messages(input: &DocumentInput) -> Vec<Message> {
    let instructions = r#"Analise o documento de pedido de venda e extraia APENAS os dados de produtos encontrados.

Responda EXATAMENTE neste formato JSON:
{
    "products": [
        {
            "code": "código do produto ou null",
            "reference": "referência do produto ou null",
            "description": "descrição completa do produto",
            "quantity": número_da_quantidade,
            "unit_value": valor_unitário_numérico,
            "total_value": valor_total_numérico
        }
    ]
}

REGRAS OBRIGATÓRIAS:
- Responda APENAS com JSON válido
- Use null para campos não disponíveis (não aspas vazias)
- Valores numéricos devem ser números (sem símbolos de moeda)
- Extraia APENAS produtos/materiais, ignore cabeçalho, rodapé, etc.
- Se não encontrar produtos, retorne: {"products": []}"#;

    match input {
        DocumentInput::Text(text) => vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "{}\n\n---INÍCIO DO TEXTO---\n{}\n---FIM DO TEXTO---",
                instructions, text
            )),
        ],
        DocumentInput::Image(data) => vec![
            Message::system(SYSTEM_PROMPT),
            Message::user_with_image(instructions, data),
        ],
    }
}

/// Run one extraction call against a backend and validate the response.
pub async fn extract_products(
    client: &dyn ChatModel,
    input: &DocumentInput,
) -> Result<Vec<RawProduct>, ProviderError> {
    let messages = extraction_messages(input);
    let response = client.complete(&messages).await?;
    debug!("{}: raw response length {} chars", client.name(), response.len());
    parse_products(&response)
}

/// Parse an AI response into the product list, stripping markdown code
/// fences if present.
pub fn parse_products(response: &str) -> Result<Vec<RawProduct>, ProviderError> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    let parsed: ProductListResponse = serde_json::from_str(json_str).map_err(|e| {
        ProviderError::Parse(format!(
            "{}: {}",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })?;

    Ok(parsed.products)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let products = parse_products(r#"{"products": [{"description": "Caneta", "quantity": 2}]}"#)
            .unwrap();
        assert_eq!(products.len(), 1);
    }

    #[test]
    fn strips_json_code_fence() {
        let response = "Aqui está o resultado:\n```json\n{\"products\": []}\n```\nEspero ter ajudado!";
        assert!(parse_products(response).unwrap().is_empty());
    }

    #[test]
    fn strips_anonymous_code_fence() {
        let response = "```\n{\"products\": [{\"description\": \"Lápis\"}]}\n```";
        assert_eq!(parse_products(response).unwrap().len(), 1);
    }

    #[test]
    fn non_json_is_a_parse_error() {
        let err = parse_products("Desculpe, não consegui processar o documento.").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn text_input_builds_two_messages() {
        let messages = extraction_messages(&DocumentInput::Text("PEDIDO 123".to_string()));
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].role, Role::System));
        match &messages[1].parts[0] {
            ContentPart::Text { text } => assert!(text.contains("PEDIDO 123")),
            _ => panic!("expected text part"),
        }
    }

    #[test]
    fn image_input_attaches_base64_part() {
        // Smallest valid PNG header is enough for format sniffing.
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
        let messages = extraction_messages(&DocumentInput::Image(png.to_vec()));
        let parts = &messages[1].parts;
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            ContentPart::Image { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert!(!data.is_empty());
            }
            _ => panic!("expected image part"),
        }
    }
}
