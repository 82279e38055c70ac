use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use alfred_bus::{Event, EventBus, EventType};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext};
use alfred_core::Result;
use alfred_sessions::{SessionKey, SessionManager, TranscriptMessage};

use crate::agent::Agent;

/// Dispatches inbound messages into the agent pipeline.
///
/// The router owns the session map; the agent only ever sees the single
/// locked session for the turn. Every stage publishes domain events so the
/// gateway can mirror the live pipeline to WS clients.
pub struct Router {
    sessions: Arc<SessionManager>,
    agent: Arc<dyn Agent>,
    bus: EventBus,
}

impl Router {
    pub fn new(sessions: Arc<SessionManager>, agent: Arc<dyn Agent>, bus: EventBus) -> Self {
        Self {
            sessions,
            agent,
            bus,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one inbound message and produce its reply.
    ///
    /// Agent failures do not propagate: they become an `is_error` outbound
    /// so the conversation survives. Only infrastructure failures (session
    /// storage) surface as `Err`.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        msg: InboundMessage,
    ) -> Result<OutboundMessage> {
        self.run_turn(ctx, msg, false).await
    }

    /// Streaming variant: partial chunks are published as `stream_delta`
    /// events for the given session; failures publish `stream_error`.
    pub async fn handle_stream(
        &self,
        ctx: &RequestContext,
        msg: InboundMessage,
    ) -> Result<OutboundMessage> {
        self.run_turn(ctx, msg, true).await
    }

    async fn run_turn(
        &self,
        ctx: &RequestContext,
        msg: InboundMessage,
        streaming: bool,
    ) -> Result<OutboundMessage> {
        let key = SessionKey::new(&ctx.tenant_id, &msg.channel_name, &msg.session_id);
        let (handle, created) = self.sessions.get_or_create(&key)?;
        let session_id = handle.id.clone();

        if created {
            self.bus.publish(Event::for_session(
                EventType::SessionCreated,
                session_id.clone(),
                json!({ "channel": msg.channel_name, "tenant": ctx.tenant_id }),
            ));
        }

        self.bus.publish(Event::for_session(
            EventType::MessageReceived,
            session_id.clone(),
            json!({
                "channel": msg.channel_name,
                "sender": msg.sender_id,
                "content": msg.content,
            }),
        ));

        let mut session = handle.state.lock().await;
        session.push(TranscriptMessage::user(&msg.content));

        let result = if streaming {
            let bus = self.bus.clone();
            let sid = session_id.clone();
            let on_delta = move |delta: &str| {
                bus.publish(Event::for_session(
                    EventType::StreamDelta,
                    sid.clone(),
                    json!({ "delta": delta }),
                ));
            };
            self.agent
                .handle_stream(ctx, &mut session, &msg, &on_delta)
                .await
        } else {
            self.agent.handle_message(ctx, &mut session, &msg).await
        };

        match result {
            Ok(reply) => {
                session.push(TranscriptMessage::assistant(&reply));
                if let Err(e) = self.sessions.persist(&session) {
                    warn!(session = %session_id, error = %e, "failed to persist session");
                }
                drop(session);

                self.bus.publish(Event::for_session(
                    EventType::MessageSent,
                    session_id.clone(),
                    json!({ "channel": msg.channel_name, "content": reply }),
                ));
                debug!(session = %session_id, "agent turn completed");
                Ok(OutboundMessage::reply_to(&msg, reply))
            }
            Err(e) => {
                if let Err(persist_err) = self.sessions.persist(&session) {
                    warn!(session = %session_id, error = %persist_err, "failed to persist session");
                }
                drop(session);

                let event_type = if streaming {
                    EventType::StreamError
                } else {
                    EventType::AgentError
                };
                self.bus.publish(Event::for_session(
                    event_type,
                    session_id.clone(),
                    json!({ "error": e.to_string() }),
                ));
                warn!(session = %session_id, error = %e, "agent turn failed");
                Ok(OutboundMessage::error_reply(&msg, e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::AlfredError;
    use alfred_sessions::Session;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn handle_message(
            &self,
            _ctx: &RequestContext,
            _session: &mut Session,
            msg: &InboundMessage,
        ) -> Result<String> {
            Ok(format!("echo: {}", msg.content))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        async fn handle_message(
            &self,
            _ctx: &RequestContext,
            _session: &mut Session,
            _msg: &InboundMessage,
        ) -> Result<String> {
            Err(AlfredError::MemoryUnavailable("store offline".into()))
        }
    }

    fn make_router(agent: Arc<dyn Agent>) -> (Router, EventBus, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let sessions = Arc::new(SessionManager::new(dir.path()).unwrap());
        let bus = EventBus::new();
        (Router::new(sessions, agent, bus.clone()), bus, dir)
    }

    #[tokio::test]
    async fn reply_flows_back_with_session_intact() {
        let (router, bus, _dir) = make_router(Arc::new(EchoAgent));
        let ctx = RequestContext::new("default");

        let msg = InboundMessage::new("telegram", "42", "u1", "Hello bot");
        let out = router.handle(&ctx, msg).await.unwrap();

        assert_eq!(out.session_id, "42");
        assert_eq!(out.content, "echo: Hello bot");
        assert!(!out.is_error);

        let handle = router.sessions().get("default:telegram:42").unwrap();
        let session = handle.state.lock().await;
        assert_eq!(session.messages.len(), 2);
        bus.close().await;
    }

    #[tokio::test]
    async fn agent_failure_becomes_error_outbound() {
        let (router, bus, _dir) = make_router(Arc::new(FailingAgent));
        let ctx = RequestContext::new("default");

        let received = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        bus.subscribe(EventType::MessageReceived, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let e = Arc::clone(&errored);
        bus.subscribe(EventType::AgentError, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let msg = InboundMessage::new("irc", "#ops", "alice", "run it");
        let out = router.handle(&ctx, msg).await.unwrap();

        assert!(out.is_error);
        assert!(out.content.contains("store offline"));
        assert!(out.rendered_content().starts_with("Error: "));

        bus.close().await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(errored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_publishes_deltas() {
        let (router, bus, _dir) = make_router(Arc::new(EchoAgent));
        let ctx = RequestContext::new("default");

        let deltas = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&deltas);
        bus.subscribe(EventType::StreamDelta, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        let msg = InboundMessage::new("http", "http-1", "client", "stream me");
        let out = router.handle_stream(&ctx, msg).await.unwrap();
        assert_eq!(out.content, "echo: stream me");

        bus.close().await;
        assert_eq!(deltas.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tenant_scopes_the_session_key() {
        let (router, bus, _dir) = make_router(Arc::new(EchoAgent));

        let msg = InboundMessage::new("slack", "C1", "u1", "hi");
        router
            .handle(&RequestContext::new("acme"), msg.clone())
            .await
            .unwrap();
        router
            .handle(&RequestContext::new("globex"), msg)
            .await
            .unwrap();

        assert!(router.sessions().get("acme:slack:C1").is_ok());
        assert!(router.sessions().get("globex:slack:C1").is_ok());
        bus.close().await;
    }
}
