use thiserror::Error;

/// Discriminator for [`AlfredError`] variants.
///
/// RPC handlers and channels branch on the kind rather than on the rendered
/// message, so the display strings can change without breaking callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Duplicate,
    Unauthorized,
    Forbidden,
    AuthFailed,
    LimitReached,
    SessionNotFound,
    ToolNotFound,
    MemoryUnavailable,
    EncryptionFailed,
    RpcInvalidPayload,
    RpcMethodNotFound,
    ProcessNotRunning,
    VectorStore,
    Transport,
}

#[derive(Debug, Error)]
pub enum AlfredError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("limit reached: {0}")]
    LimitReached(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("memory unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("invalid RPC payload: {0}")]
    RpcInvalidPayload(String),

    #[error("method not found: {method}")]
    RpcMethodNotFound { method: String },

    #[error("process not running: {0}")]
    ProcessNotRunning(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    /// A transport-level failure, preserving the underlying cause.
    #[error("{subsystem}.{op}: {source}")]
    Transport {
        subsystem: &'static str,
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl AlfredError {
    /// Wrap an arbitrary transport error with subsystem/operation context.
    pub fn transport(
        subsystem: &'static str,
        op: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AlfredError::Transport {
            subsystem,
            op,
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AlfredError::InvalidInput(_) => ErrorKind::InvalidInput,
            AlfredError::NotFound(_) => ErrorKind::NotFound,
            AlfredError::Duplicate(_) => ErrorKind::Duplicate,
            AlfredError::Unauthorized(_) => ErrorKind::Unauthorized,
            AlfredError::Forbidden(_) => ErrorKind::Forbidden,
            AlfredError::AuthFailed(_) => ErrorKind::AuthFailed,
            AlfredError::LimitReached(_) => ErrorKind::LimitReached,
            AlfredError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            AlfredError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            AlfredError::MemoryUnavailable(_) => ErrorKind::MemoryUnavailable,
            AlfredError::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            AlfredError::RpcInvalidPayload(_) => ErrorKind::RpcInvalidPayload,
            AlfredError::RpcMethodNotFound { .. } => ErrorKind::RpcMethodNotFound,
            AlfredError::ProcessNotRunning(_) => ErrorKind::ProcessNotRunning,
            AlfredError::VectorStore(_) => ErrorKind::VectorStore,
            AlfredError::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// Short error code string sent to clients in response frames.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::LimitReached => "LIMIT_REACHED",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::MemoryUnavailable => "MEMORY_UNAVAILABLE",
            ErrorKind::EncryptionFailed => "ENCRYPTION_FAILED",
            ErrorKind::RpcInvalidPayload => "RPC_INVALID_PAYLOAD",
            ErrorKind::RpcMethodNotFound => "RPC_METHOD_NOT_FOUND",
            ErrorKind::ProcessNotRunning => "PROCESS_NOT_RUNNING",
            ErrorKind::VectorStore => "VECTOR_STORE_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AlfredError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = AlfredError::SessionNotFound("telegram:42".into());
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn transport_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = AlfredError::transport("irc", "read", io);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("irc.read"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn method_not_found_includes_method() {
        let err = AlfredError::RpcMethodNotFound {
            method: "chat.bogus".into(),
        };
        assert!(err.to_string().contains("chat.bogus"));
    }
}
