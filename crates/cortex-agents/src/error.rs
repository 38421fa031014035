use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {agent} failed: {message}")]
    Llm { agent: String, message: String },

    #[error("agent {agent}: JSON parsing failed")]
    Parse {
        agent: String,
        raw_response: String,
        errors: Vec<String>,
    },

    #[error("agent config not found or inactive: {0}")]
    ConfigMissing(String),

    #[error(transparent)]
    Store(#[from] cortex_store::StoreError),

    #[error(transparent)]
    Provider(#[from] cortex_llm::LlmError),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Llm { .. } => "AGENT_ERROR",
            AgentError::Parse { .. } => "PARSE_ERROR",
            AgentError::ConfigMissing(_) => "CONFIG_ERROR",
            AgentError::Store(_) => "DATABASE_ERROR",
            AgentError::Provider(_) => "LLM_PROVIDER_ERROR",
        }
    }

    /// Structured failure payload surfaced to pipeline callers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AgentError::Parse {
                agent,
                raw_response,
                errors,
            } => serde_json::json!({
                "error": "JSON parsing failed",
                "error_code": self.code(),
                "error_message": format!("JSON parsing failed: {}", errors.join("; ")),
                "raw_response": raw_response,
                "agent_name": agent,
            }),
            AgentError::Llm { agent, message } => serde_json::json!({
                "error": "Agent execution failed",
                "error_code": self.code(),
                "error_message": message,
                "agent_name": agent,
            }),
            other => serde_json::json!({
                "error": other.to_string(),
                "error_code": other.code(),
            }),
        }
    }
}

impl From<AgentError> for cortex_core::CortexError {
    fn from(e: AgentError) -> Self {
        match &e {
            AgentError::Llm { agent, message } => cortex_core::CortexError::Agent {
                agent: agent.clone(),
                reason: message.clone(),
            },
            AgentError::Parse { agent, errors, .. } => cortex_core::CortexError::Agent {
                agent: agent.clone(),
                reason: format!("JSON parsing failed: {}", errors.join("; ")),
            },
            _ => cortex_core::CortexError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
