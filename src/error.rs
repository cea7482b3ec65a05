use thiserror::Error;

/// Errors surfaced synchronously to API callers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("enqueue failure: {0}")]
    EnqueueFailure(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl JobError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::EnqueueFailure(_) => "ENQUEUE_FAILURE",
            Self::Conflict(_) => "CONFLICT",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Name of the request field at fault, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidConfig { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Failures raised while a worker executes a job. Their `Display` text is
/// what ends up in the job's error detail.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("timeout")]
    Timeout,

    #[error("effect '{effect}' failed: {message}")]
    Effect { effect: String, message: String },

    #[error("effect '{0}' is not registered")]
    UnknownEffect(String),

    #[error("input audio file {0} not found")]
    MissingInput(i64),

    #[error("failed to decode input audio: {0}")]
    Decode(String),

    #[error("failed to encode output audio: {0}")]
    Encode(String),

    #[error("storage error: {0}")]
    Storage(String),
}
