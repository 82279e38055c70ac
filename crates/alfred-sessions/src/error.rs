use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session does not exist (or belongs to another tenant).
    #[error("session not found: {id}")]
    NotFound { id: String },

    /// A persistence operation failed.
    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A transcript file could not be decoded.
    #[error("session decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The provided session key string is malformed.
    ///
    /// Expected format: `{tenant}:{channel}:{natural_id}`
    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

impl From<SessionError> for alfred_core::AlfredError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { id } => alfred_core::AlfredError::SessionNotFound(id),
            SessionError::InvalidKey(detail) => alfred_core::AlfredError::InvalidInput(detail),
            SessionError::Storage(e) => alfred_core::AlfredError::transport("sessions", "storage", e),
            SessionError::Decode(e) => alfred_core::AlfredError::transport("sessions", "decode", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
