use std::sync::LazyLock;

use regex::Regex;

/// Fallback when a provider sends a throttle delay we cannot read.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

static RETRY_DELAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)s").expect("retry delay pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    Connect,
    AuthError,
    InvalidRequest,
    InvalidResponse,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Timeout | Self::Connect
        )
    }
}

/// Structured failure returned (inside `anyhow::Error`) by provider calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{provider} api error ({}){}: {message}", status_label(.status), retry_label(.kind, .retry_after_secs))]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Machine-readable delay the provider asked us to wait, if any.
    pub retry_after_secs: Option<u64>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Delay of an explicit provider throttle. `None` for every other failure,
    /// including a 429 that carried no usable delay.
    pub fn throttle_delay(&self) -> Option<u64> {
        match self.kind {
            ProviderErrorKind::RateLimit => self.retry_after_secs,
            _ => None,
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "transport".to_string())
}

fn retry_label(kind: &ProviderErrorKind, retry_after: &Option<u64>) -> String {
    match (kind.is_retryable(), *retry_after) {
        (true, Some(secs)) => format!(" [retryable after {secs}s]"),
        (true, None) => " [retryable]".to_string(),
        _ => String::new(),
    }
}

/// Parse a provider delay string such as `"30s"`.
pub fn parse_retry_delay(raw: &str) -> u64 {
    RETRY_DELAY_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_DELAY_SECS)
}
