use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No API key for provider {0}")]
    MissingKey(String),
}

impl From<LlmError> for cortex_core::CortexError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::UnknownProvider(p) => {
                cortex_core::CortexError::Config(format!("unknown provider: {p}"))
            }
            LlmError::MissingKey(p) => {
                cortex_core::CortexError::Config(format!("no API key for provider: {p}"))
            }
            other => cortex_core::CortexError::Llm(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
