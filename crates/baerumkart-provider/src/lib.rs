pub mod error;
pub mod openai;
pub mod openai_compat;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{parse_retry_delay, ProviderError, ProviderErrorKind, DEFAULT_RETRY_DELAY_SECS};
pub use openai::OpenAiProvider;
pub use openai_compat::{custom, openrouter_with_base, with_app_attribution};
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Provider type identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenRouter,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Canned replies, no network
    Stub,
}

/// Configuration for the completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sent as `HTTP-Referer` to OpenRouter.
    #[serde(default)]
    pub site_url: Option<String>,
    /// Sent as `X-Title` to OpenRouter.
    #[serde(default)]
    pub site_name: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
            site_url: None,
            site_name: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::OpenRouter => {
            let key = non_empty(config.api_key.as_deref())
                .ok_or_else(|| anyhow!("openrouter requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or(openai_compat::OPENROUTER_API_BASE);
            let provider = openrouter_with_base(key, base_url);
            let site_url = config.site_url.as_deref().unwrap_or("http://localhost:3000");
            let site_name = config.site_name.as_deref().unwrap_or("BaerumKart");
            Arc::new(with_app_attribution(provider, site_url, site_name))
        }
        ProviderType::Custom => {
            let key = non_empty(config.api_key.as_deref())
                .ok_or_else(|| anyhow!("custom provider requires api_key"))?;
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires base_url"))?;
            Arc::new(custom(key, base_url.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::info!("completion provider ready ({:?})", config.provider_type);
    Ok(provider)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Echoes the user message back; handy for offline runs.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(LlmResponse {
            text: format!("[stub:{}] {}", request.model, user_text),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}
