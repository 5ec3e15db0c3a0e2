// 🚨 Engine Errors - one taxonomy for every engine operation
//
// Validation-class errors are surfaced immediately and never retried.
// Upstream failures are degraded by callers (empty or cached results).
// Persistence failures abort only the affected record's transition.

use thiserror::Error;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or missing required field, unknown action, missing confirmation
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("decision record not found: {0}")]
    NotFound(String),

    #[error("cannot {action} a record in status '{status}'")]
    InvalidTransition { action: String, status: String },

    /// An external source or registry failed
    #[error("upstream '{source_name}' unavailable: {message}")]
    UpstreamUnavailable { source_name: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    /// A background classification task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl EngineError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn upstream<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::UpstreamUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's input (never retried)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::NotFound(_)
                | EngineError::InvalidTransition { .. }
        )
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, EngineError::Persistence(_) | EngineError::Database(_))
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, EngineError::UpstreamUnavailable { .. })
    }
}
