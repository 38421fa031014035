use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] cortex_store::StoreError),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("no handler registered for job: {0}")]
    NoHandler(String),

    #[error("invalid schedule for job {job}: {reason}")]
    InvalidSchedule { job: String, reason: String },
}

impl From<SchedulerError> for cortex_core::CortexError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(s) => s.into(),
            SchedulerError::JobNotFound(name) | SchedulerError::NoHandler(name) => {
                cortex_core::CortexError::NotFound(format!("job {name}"))
            }
            other => cortex_core::CortexError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
