use thiserror::Error;

/// Errors raised along the aggregation and scoring path.
///
/// `NotFound` and `Validation` abort the request that raised them.
/// `Inference` (and anything else thrown while producing derived
/// artifacts) is caught at the aggregation boundary and logged; the
/// committed aggregate is never rolled back for it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
