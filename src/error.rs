use thiserror::Error;

/// Domain errors surfaced to the caller through the response envelope.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    /// An incoming association references an id that does not exist in the
    /// referenced table. The whole call aborts; nothing is written.
    #[error("unknown {kind} id {id}")]
    InvalidReference { kind: &'static str, id: i64 },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl ServiceError {
    pub fn status(&self) -> i64 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::InvalidReference { .. }
            | ServiceError::UnsupportedFormat(_)
            | ServiceError::BadRequest(_) => 400,
            ServiceError::TransactionFailed(_) | ServiceError::Storage(_) => 500,
        }
    }
}
