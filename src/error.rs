//! Error taxonomy for the ingestion and query engine.
//!
//! Every boundary crossing between the components in `pipeline`, `rules`,
//! `validate`, `storage` and `query` produces one of these variants instead of
//! an opaque `anyhow::Error`, so callers can match on the kind and decide
//! whether it's retryable, a data problem, or fatal.

use thiserror::Error;

/// The six error kinds from the error taxonomy.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Adapter(_) => "adapter",
            EngineError::Transform(_) => "transform",
            EngineError::Validation(_) => "validation",
            EngineError::Storage(_) => "storage",
            EngineError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::Config(m)
            | EngineError::Adapter(m)
            | EngineError::Transform(m)
            | EngineError::Validation(m)
            | EngineError::Storage(m)
            | EngineError::Internal(m) => m,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<rust_decimal::Error> for EngineError {
    fn from(e: rust_decimal::Error) -> Self {
        EngineError::Transform(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
