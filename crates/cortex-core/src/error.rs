use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("Agent {agent} failed: {reason}")]
    Agent { agent: String, reason: String },

    #[error("Request {id} is no longer pending")]
    Conflict { id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Sync authentication failed for {provider}")]
    SyncAuth { provider: String },

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CortexError {
    /// Short error code string surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            CortexError::Config(_) => "CONFIG_ERROR",
            CortexError::Database(_) => "DATABASE_ERROR",
            CortexError::Validation(_) => "PARSE_ERROR",
            CortexError::Llm(_) => "LLM_PROVIDER_ERROR",
            CortexError::Agent { .. } => "AGENT_ERROR",
            CortexError::Conflict { .. } => "CONFLICT",
            CortexError::NotFound(_) => "NOT_FOUND",
            CortexError::TransientNetwork(_) => "TRANSIENT_NETWORK",
            CortexError::SyncAuth { .. } => "SYNC_AUTH_FAILED",
            CortexError::Channel { .. } => "CHANNEL_ERROR",
            CortexError::Serialization(_) => "SERIALIZATION_ERROR",
            CortexError::Io(_) => "IO_ERROR",
            CortexError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CortexError>;
