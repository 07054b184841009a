use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{parse_retry_delay, ProviderError, ProviderErrorKind, DEFAULT_RETRY_DELAY_SECS};
use crate::{LlmMessage, LlmProvider, LlmRequest, LlmResponse};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    name: String,
    api_key: String,
    api_base: String,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            name: "openai".to_string(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            extra_headers: vec![],
        }
    }

    /// Name used in error messages and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn to_api_request(request: LlmRequest) -> ApiRequest {
        ApiRequest {
            model: request.model,
            messages: to_api_messages(request.system, request.messages),
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
        }
    }

    fn error(&self, kind: ProviderErrorKind, message: impl Into<String>) -> ProviderError {
        ProviderError::new(self.name.clone(), kind, message)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let payload = Self::to_api_request(request);

        let mut builder = self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");
        for (name, value) in &self.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = match builder.json(&payload).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(self
                    .error(
                        ProviderErrorKind::Timeout,
                        format!("request timed out after {REQUEST_TIMEOUT_SECS}s"),
                    )
                    .into());
            }
            Err(e) if e.is_connect() => {
                return Err(self.error(ProviderErrorKind::Connect, e.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let header_delay = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<ApiErrorEnvelope>(&text).ok();
            let err = format_api_error(&self.name, status, parsed, header_delay);
            tracing::debug!("{err}");
            return Err(err.into());
        }

        let body: ApiResponse = resp.json().await.map_err(|e| {
            self.error(
                ProviderErrorKind::InvalidResponse,
                format!("malformed completion body: {e}"),
            )
        })?;
        to_llm_response(body)
            .map_err(|message| anyhow::Error::from(self.error(ProviderErrorKind::InvalidResponse, message)))
    }
}

fn to_api_messages(system: Option<String>, messages: Vec<LlmMessage>) -> Vec<ApiMessage> {
    let mut result = Vec::with_capacity(messages.len() + 1);

    if let Some(system_text) = system {
        result.push(ApiMessage {
            role: "system".to_string(),
            content: system_text,
        });
    }

    for message in messages {
        if message.content.is_empty() {
            continue;
        }
        result.push(ApiMessage {
            role: message.role,
            content: message.content,
        });
    }

    result
}

fn to_llm_response(body: ApiResponse) -> std::result::Result<LlmResponse, String> {
    let choice = body
        .choices
        .first()
        .ok_or_else(|| "empty choices".to_string())?;

    Ok(LlmResponse {
        text: choice.message.content.clone().unwrap_or_default(),
        input_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
        output_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
        stop_reason: normalize_finish_reason(choice.finish_reason.clone()),
    })
}

fn normalize_finish_reason(reason: Option<String>) -> Option<String> {
    match reason.as_deref() {
        Some("stop") => Some("end_turn".to_string()),
        Some("length") => Some("max_tokens".to_string()),
        _ => reason,
    }
}

/// Build the structured error for a non-200 reply. A 429 only carries a
/// throttle delay when the body metadata or a numeric `Retry-After` header
/// supplies one.
fn format_api_error(
    provider: &str,
    status: StatusCode,
    parsed: Option<ApiErrorEnvelope>,
    header_delay: Option<u64>,
) -> ProviderError {
    let kind = ProviderErrorKind::from_status(status);
    let (message, body_delay) = match parsed {
        Some(envelope) => {
            let delay = envelope
                .error
                .metadata
                .as_ref()
                .and_then(|m| m.retry_delay.as_ref())
                .map(retry_delay_from_value);
            let message = match envelope.error.r#type {
                Some(t) => format!("{} ({t})", envelope.error.message),
                None => envelope.error.message,
            };
            (message, delay)
        }
        None => (
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
            None,
        ),
    };

    let mut err = ProviderError::new(provider, kind, message).with_status(status.as_u16());
    if kind == ProviderErrorKind::RateLimit {
        if let Some(secs) = body_delay.or(header_delay) {
            err = err.with_retry_after(secs);
        }
    }
    err
}

fn retry_delay_from_value(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::String(s) => parse_retry_delay(s),
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(DEFAULT_RETRY_DELAY_SECS),
        _ => DEFAULT_RETRY_DELAY_SECS,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiChoice {
    pub message: ApiAssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiAssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub r#type: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<ApiErrorMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorMetadata {
    #[serde(rename = "retryDelay", default)]
    pub retry_delay: Option<serde_json::Value>,
}
