use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext};

use crate::error::ChannelError;

/// The per-message dispatch callback retained by `start`.
///
/// Channels call it once per accepted inbound message and deliver the
/// returned reply back on their own transport. The context carries the
/// tenant the channel is configured for.
pub type InboundHandler = Arc<
    dyn Fn(
            RequestContext,
            InboundMessage,
        ) -> Pin<Box<dyn Future<Output = alfred_core::Result<OutboundMessage>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure as an [`InboundHandler`].
pub fn handler_fn<F, Fut>(f: F) -> InboundHandler
where
    F: Fn(RequestContext, InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = alfred_core::Result<OutboundMessage>> + Send + 'static,
{
    Arc::new(move |ctx, msg| Box::pin(f(ctx, msg)))
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Common interface implemented by every transport adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Open the transport and return. The receive loop runs on background
    /// tasks until [`Channel::stop`] is called; `handler` is retained and
    /// invoked for every accepted inbound message.
    async fn start(&self, handler: InboundHandler) -> Result<(), ChannelError>;

    /// Tear the transport down. Idempotent: stop before start and double
    /// stop are both no-ops.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message.
    ///
    /// A missing `session_id` is a validation error. Send failures
    /// propagate to the caller — unlike receive-loop errors, which the
    /// channel retries internally.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}

/// Shared teardown state: the shutdown token handed to the receive loop.
///
/// Encapsulates the stop-before-start and double-stop no-op rules so each
/// adapter doesn't reimplement them.
pub struct Lifecycle {
    token: std::sync::Mutex<Option<tokio_util::sync::CancellationToken>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            token: std::sync::Mutex::new(None),
        }
    }

    /// Begin a run: returns the fresh shutdown token for the loop tasks.
    pub fn begin(&self) -> tokio_util::sync::CancellationToken {
        let token = tokio_util::sync::CancellationToken::new();
        *self.token.lock().unwrap() = Some(token.clone());
        token
    }

    /// Cancel the current run if any. Safe to call at any time.
    pub fn end(&self) {
        if let Some(token) = self.token.lock().unwrap().take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the one invariant every transport shares before sending.
pub(crate) fn require_session_id(msg: &OutboundMessage) -> Result<&str, ChannelError> {
    if msg.session_id.is_empty() {
        return Err(ChannelError::InvalidOutbound(
            "outbound message has no session_id".into(),
        ));
    }
    Ok(&msg.session_id)
}
