use thiserror::Error;

/// Failures inside the chat pipeline. Only the broker sees these; callers
/// always get a reply string.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("knowledge store unavailable: {0}")]
    DataUnavailable(String),

    #[error("provider throttled, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("generation failed after {attempts} attempts: {message}")]
    GenerationFailed { attempts: u32, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Throttled { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
