use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport is not connected (send before start, or after stop).
    #[error("channel not connected: {0}")]
    NotConnected(String),

    /// The outbound message is unusable (e.g. missing session id).
    #[error("invalid outbound message: {0}")]
    InvalidOutbound(String),

    /// No pending reply slot for this session (HTTP channel).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The remote API rejected a call.
    #[error("{channel} API error: {detail}")]
    Api { channel: &'static str, detail: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn api(channel: &'static str, detail: impl Into<String>) -> Self {
        ChannelError::Api {
            channel,
            detail: detail.into(),
        }
    }
}

impl From<ChannelError> for alfred_core::AlfredError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::SessionNotFound(id) => alfred_core::AlfredError::SessionNotFound(id),
            ChannelError::InvalidOutbound(detail) => alfred_core::AlfredError::InvalidInput(detail),
            ChannelError::Auth(detail) => alfred_core::AlfredError::AuthFailed(detail),
            other => alfred_core::AlfredError::transport("channel", "send", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
