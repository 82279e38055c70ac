use async_trait::async_trait;

use alfred_core::types::{InboundMessage, RequestContext};
use alfred_core::Result;
use alfred_sessions::Session;

/// Callback invoked with each partial chunk during a streaming turn.
pub type DeltaSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// The single logical agent pipeline every inbound message flows through.
///
/// The LLM, tool loop, and memory retrieval live behind this seam; the
/// router owns the session map and hands the locked transcript in.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one agent turn and return the reply text.
    ///
    /// The session is locked by the caller for the duration of the turn,
    /// which is what serialises messages per conversation. Implementations
    /// should observe `ctx.cancel` at their suspension points.
    async fn handle_message(
        &self,
        ctx: &RequestContext,
        session: &mut Session,
        msg: &InboundMessage,
    ) -> Result<String>;

    /// Streaming variant. The default implementation delegates to
    /// [`Agent::handle_message`] and emits the full reply as one delta.
    async fn handle_stream(
        &self,
        ctx: &RequestContext,
        session: &mut Session,
        msg: &InboundMessage,
        on_delta: DeltaSink<'_>,
    ) -> Result<String> {
        let reply = self.handle_message(ctx, session, msg).await?;
        on_delta(&reply);
        Ok(reply)
    }
}
