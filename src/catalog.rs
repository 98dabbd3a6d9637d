//! Provider and model catalog.
//!
//! Configuration data, not behavior: the per-provider model lists and API-key
//! format hints are a static table loaded once at startup, optionally extended
//! through the `ADDITIONAL_MODELS` env var (JSON, same shape as the table).

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One provider's catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub models: Vec<String>,
    pub default: String,
    /// Anchored regex the API key must match; absent means length-only check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<String>,
}

/// Catalog of all supported providers, keyed by provider id.
#[derive(Debug)]
pub struct ProviderCatalog {
    providers: IndexMap<String, ProviderEntry>,
}

/// Provider summary for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

impl ProviderCatalog {
    /// Build the built-in table and merge `ADDITIONAL_MODELS` on top.
    pub fn load_from_env() -> Self {
        let mut catalog = Self::builtin();

        if let Ok(raw) = std::env::var("ADDITIONAL_MODELS") {
            match serde_json::from_str::<IndexMap<String, ExtraProvider>>(&raw) {
                Ok(extra) => catalog.merge(extra),
                Err(e) => warn!("Ignoring malformed ADDITIONAL_MODELS: {}", e),
            }
        }

        info!("Provider catalog loaded: {} providers", catalog.providers.len());
        catalog
    }

    fn builtin() -> Self {
        let mut providers = IndexMap::new();

        let mut add = |id: &str, name: &str, models: &[&str], key_pattern: Option<&str>| {
            providers.insert(
                id.to_string(),
                ProviderEntry {
                    name: name.to_string(),
                    models: models.iter().map(|m| m.to_string()).collect(),
                    default: models[0].to_string(),
                    key_pattern: key_pattern.map(|p| p.to_string()),
                },
            );
        };

        add("openai", "OpenAI", &["gpt-4o", "gpt-4o-mini", "gpt-4", "gpt-3.5-turbo"], Some(r"^sk-"));
        add(
            "anthropic",
            "Anthropic",
            &["claude-3-opus-20240229", "claude-3-sonnet-20240229", "claude-3-haiku-20240307"],
            Some(r"^sk-ant-"),
        );
        add("google", "Google Gemini", &["gemini-pro", "gemini-flash", "gemini-ultra"], Some(r"^AIzaSy"));
        add("deepseek", "DeepSeek", &["deepseek-chat", "deepseek-coder", "deepseek-67b"], Some(r"^sk-"));
        add("meta", "Meta Llama", &["llama-3-70b", "llama-3-8b", "llama-2-70b"], None);
        add("mistral", "Mistral AI", &["mistral-large", "mistral-medium", "mistral-small"], None);
        add("groq", "Groq", &["mixtral-8x7b-32768", "llama2-70b-4096", "gemma-7b-it"], Some(r"^gsk_"));
        add(
            "together",
            "Together AI",
            &["meta-llama/Llama-2-70b-chat-hf", "mistralai/Mixtral-8x7B-Instruct-v0.1"],
            None,
        );
        add(
            "fireworks",
            "Fireworks AI",
            &[
                "accounts/fireworks/models/llama-v2-70b-chat",
                "accounts/fireworks/models/mixtral-8x7b-instruct",
            ],
            None,
        );
        add(
            "nvidia",
            "NVIDIA NIM",
            &["nvidia/llama3-chatqa-1.5-70b", "nvidia/llama3-chatqa-1.5-8b"],
            None,
        );

        Self { providers }
    }

    fn merge(&mut self, extra: IndexMap<String, ExtraProvider>) {
        for (id, entry) in extra {
            match self.providers.get_mut(&id) {
                Some(existing) => {
                    for model in entry.models {
                        if !existing.models.contains(&model) {
                            existing.models.push(model);
                        }
                    }
                }
                None => {
                    let Some(default) = entry
                        .default
                        .clone()
                        .or_else(|| entry.models.first().cloned())
                    else {
                        warn!("ADDITIONAL_MODELS provider '{}' has no models, skipping", id);
                        continue;
                    };
                    self.providers.insert(
                        id.clone(),
                        ProviderEntry {
                            name: entry.name.unwrap_or_else(|| id.clone()),
                            models: entry.models,
                            default,
                            key_pattern: None,
                        },
                    );
                }
            }
        }
    }

    /// Providers for the listing endpoint, in catalog order.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|(id, entry)| ProviderInfo {
                id: id.clone(),
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Models for one provider.
    pub fn models(&self, provider: &str) -> Option<Vec<String>> {
        self.providers.get(provider).map(|e| e.models.clone())
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Default model used when the upload form leaves the model blank.
    pub fn default_model(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).map(|e| e.default.clone())
    }

    /// Cheap key-format check run before any provider call, so an obviously
    /// malformed key never spends credits.
    pub fn validate_api_key(&self, provider: &str, api_key: &str) -> bool {
        if api_key.is_empty() {
            return false;
        }
        match self.providers.get(provider).and_then(|e| e.key_pattern.as_deref()) {
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => re.is_match(api_key),
                Err(_) => api_key.len() > 10,
            },
            None => {
                if self.providers.contains_key(provider) {
                    api_key.len() > 20
                } else {
                    api_key.len() > 10
                }
            }
        }
    }
}

/// `ADDITIONAL_MODELS` entry: a full provider or just extra models for one.
#[derive(Debug, Deserialize)]
struct ExtraProvider {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    default: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_lists_providers_in_order() {
        let catalog = ProviderCatalog::builtin();
        let ids: Vec<String> = catalog.providers().into_iter().map(|p| p.id).collect();
        assert_eq!(ids[0], "openai");
        assert!(ids.contains(&"anthropic".to_string()));
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn models_for_known_and_unknown_provider() {
        let catalog = ProviderCatalog::builtin();
        let models = catalog.models("openai").unwrap();
        assert!(models.contains(&"gpt-4o".to_string()));
        assert!(catalog.models("acme").is_none());
    }

    #[test]
    fn key_format_hints() {
        let catalog = ProviderCatalog::builtin();
        assert!(catalog.validate_api_key("openai", "sk-abc123"));
        assert!(!catalog.validate_api_key("openai", "pk-abc123"));
        assert!(catalog.validate_api_key("anthropic", "sk-ant-abc123"));
        assert!(!catalog.validate_api_key("anthropic", "sk-abc123"));
        assert!(catalog.validate_api_key("google", "AIzaSyABC"));
        assert!(catalog.validate_api_key("groq", "gsk_abc"));
        // Length-only providers.
        assert!(catalog.validate_api_key("together", "x".repeat(24).as_str()));
        assert!(!catalog.validate_api_key("together", "short"));
        assert!(!catalog.validate_api_key("openai", ""));
    }

    #[test]
    fn merge_extends_existing_and_adds_new() {
        let mut catalog = ProviderCatalog::builtin();
        let extra: IndexMap<String, ExtraProvider> = serde_json::from_str(
            r#"{
                "openai": {"models": ["gpt-4.1"]},
                "acme": {"name": "Acme AI", "models": ["acme-1"], "default": "acme-1"}
            }"#,
        )
        .unwrap();
        catalog.merge(extra);

        assert!(catalog.models("openai").unwrap().contains(&"gpt-4.1".to_string()));
        assert!(catalog.contains("acme"));
        assert_eq!(catalog.providers.get("acme").unwrap().default, "acme-1");
    }
}
