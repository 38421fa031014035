use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Identifier not allowed: {0}")]
    ForbiddenIdentifier(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection poisoned")]
    Poisoned,
}

impl From<StoreError> for cortex_core::CortexError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => cortex_core::CortexError::NotFound(what),
            other => cortex_core::CortexError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
