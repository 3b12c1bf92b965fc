use thiserror::Error;

/// Failure of a single call to an external model service.
///
/// Always recoverable: the extractor drops the chunk, the zone assigner falls
/// back to position only.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine unavailable: {0}")]
    Unavailable(String),

    #[error("inference call timed out after {0:.1}s")]
    Timeout(f64),

    #[error("malformed inference response: {0}")]
    Malformed(String),

    #[error("inference transport error: {0}")]
    Transport(String),

    #[error("inference gate closed")]
    GateClosed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid film duration: {0}")]
    InvalidDuration(f64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no scene candidates to score")]
    EmptyPool,

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Manifest errors. `Validation` always names the offending field path so the
/// stage can abort with an actionable message.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest validation failed at `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ManifestError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field path of a validation failure, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ManifestError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
