use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] cortex_store::StoreError),

    #[error(transparent)]
    Agent(#[from] cortex_agents::AgentError),

    #[error("clarification request {0} not found")]
    RequestNotFound(i64),

    #[error("request {0} is no longer pending")]
    RequestNotPending(i64),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PipelineError> for cortex_core::CortexError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(s) => s.into(),
            PipelineError::Agent(a) => a.into(),
            PipelineError::RequestNotFound(id) => {
                cortex_core::CortexError::NotFound(format!("human request {id}"))
            }
            PipelineError::RequestNotPending(id) => cortex_core::CortexError::Conflict { id },
            PipelineError::Invalid(msg) => cortex_core::CortexError::Validation(msg),
            PipelineError::Serialization(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
