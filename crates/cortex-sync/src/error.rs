use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Authentication failed. The run aborts and the job records the error.
    #[error("authentication failed for {provider}")]
    Auth { provider: String },

    /// Transport-level failure: logged, the run stops cleanly, the next
    /// scheduled tick retries.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {status} from {operation}")]
    Status { operation: String, status: u16 },

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("invalid vCard: {0}")]
    InvalidVcard(String),

    #[error("invalid calendar data: {0}")]
    InvalidCalendar(String),

    #[error("provider not authenticated")]
    NotAuthenticated,

    #[error("missing credential field: {0}")]
    MissingCredential(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Store(#[from] cortex_store::StoreError),
}

impl SyncError {
    /// Fatal errors abort the run and bump the job's error count; everything
    /// else is transient and retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth { .. }
                | SyncError::MissingCredential(_)
                | SyncError::UnknownProvider(_)
                | SyncError::NotAuthenticated
        )
    }
}

impl From<SyncError> for cortex_core::CortexError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Auth { provider } => cortex_core::CortexError::SyncAuth { provider },
            SyncError::Network(err) => cortex_core::CortexError::TransientNetwork(err.to_string()),
            SyncError::Store(s) => s.into(),
            other => cortex_core::CortexError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
