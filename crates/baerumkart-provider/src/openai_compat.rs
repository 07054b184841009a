//! OpenAI-compatible endpoints.
//!
//! These speak the same wire format as OpenAI and differ only in base URL
//! and a few courtesy headers.

use crate::OpenAiProvider;

pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// OpenRouter API - OpenAI compatible, multi-model router
/// https://openrouter.ai/docs
pub fn openrouter_with_base(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url).with_name("openrouter")
}

/// OpenRouter ranks apps by these two headers.
pub fn with_app_attribution(
    provider: OpenAiProvider,
    site_url: &str,
    site_name: &str,
) -> OpenAiProvider {
    provider
        .with_header("HTTP-Referer", site_url)
        .with_header("X-Title", site_name)
}

/// Custom OpenAI-compatible endpoint
pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}
