// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FerricError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Document exceeds maximum size of {limit} bytes (was {size})")]
    DocumentTooLarge { size: u64, limit: u64 },

    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    #[error("Invalid query operator: {0}")]
    InvalidQueryOperator(String),

    #[error("Invalid pipeline stage: {0}")]
    InvalidPipelineStage(String),

    #[error("Compound index cannot contain more than one array-valued field: {0}")]
    UnsupportedMultikeyCombination(String),

    #[error("Duplicate key in unique index '{index}': {key}")]
    DuplicateKey { index: String, key: String },

    #[error("Write conflict, transaction aborted: {0}")]
    TransientConflict(String),

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Memory limit exceeded during {0}")]
    ExceededMemoryLimit(String),

    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Index '{0}' already exists")]
    IndexExists(String),

    #[error("Invalid index operation: {0}")]
    InvalidIndexOperation(String),

    #[error("Transaction is no longer active")]
    TransactionClosed,
}

impl FerricError {
    /// Whether the failed operation is safe to retry from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FerricError::TransientConflict(_) | FerricError::DeadlineExceeded
        )
    }

    /// Corruption is fatal to the whole engine instance, not just one operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FerricError::StorageCorruption(_))
    }
}

pub type Result<T> = std::result::Result<T, FerricError>;
