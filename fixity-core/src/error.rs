use thiserror::Error;

#[derive(Error, Debug)]
pub enum FixityError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "ingest buffer is full ({pending} pending + {incoming} incoming > {max}); try again"
    )]
    BufferFull {
        pending: usize,
        incoming: usize,
        max: usize,
    },

    #[error("Validation failed: {0}")]
    Validation(#[from] fixity_model::ModelError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FixityError {
    /// Storage failures are the only errors the flush loop retries.
    pub fn is_storage(&self) -> bool {
        matches!(self, FixityError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, FixityError>;
