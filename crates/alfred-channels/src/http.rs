//! Raw HTTP chat channel.
//!
//! Push variant with request–reply correlation: `POST /api/v1/chat`
//! registers a one-slot reply channel keyed by session id, dispatches the
//! message, and waits for the reply to arrive in the slot. This is the one
//! channel allowed to synthesise a session id (`http-<n>`) when the caller
//! omits one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use alfred_core::config::{
    HttpChannelConfig, HTTP_PENDING_TIMEOUT_SECS, MAX_CHAT_BODY_BYTES,
};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::error::{ChannelError, Result};

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    content: String,
}

enum SlotValue {
    Reply(OutboundMessage),
    Failure(String),
}

struct HttpInner {
    /// Pending reply slots, one per in-flight request, keyed by session id.
    pending: Mutex<HashMap<String, mpsc::Sender<SlotValue>>>,
    /// Monotonic counter behind synthesised `http-<n>` session ids.
    session_counter: AtomicU64,
}

struct HttpState {
    inner: Arc<HttpInner>,
    handler: InboundHandler,
}

/// Plain HTTP chat endpoint.
pub struct HttpChannel {
    config: HttpChannelConfig,
    inner: Arc<HttpInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl HttpChannel {
    pub fn new(config: HttpChannelConfig) -> Self {
        Self {
            config,
            inner: Arc::new(HttpInner {
                pending: Mutex::new(HashMap::new()),
                session_counter: AtomicU64::new(0),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn router(state: Arc<HttpState>) -> Router {
        Router::new()
            .route("/api/v1/chat", post(chat_handler))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_CHAT_BODY_BYTES))
            .with_state(state)
    }
}

#[async_trait::async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        let state = Arc::new(HttpState {
            inner: Arc::clone(&self.inner),
            handler,
        });
        let app = Self::router(state);

        let listener = tokio::net::TcpListener::bind(&self.config.addr).await?;
        info!(addr = %self.config.addr, "http chat endpoint listening");
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let shutdown = self.lifecycle.begin();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "http chat server exited");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.end();
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    /// Deliver a reply into the pending slot for its session.
    ///
    /// No slot means the waiter already gave up (or never existed) — the
    /// session-not-found error is the caller's signal.
    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let session_id = require_session_id(msg)?;
        let sender = {
            let pending = self.inner.pending.lock().unwrap();
            pending.get(session_id).cloned()
        };
        let Some(sender) = sender else {
            return Err(ChannelError::SessionNotFound(session_id.to_string()));
        };
        let _ = sender.try_send(SlotValue::Reply(msg.clone()));
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if request.content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "content is required"})),
        );
    }

    let session_id = match request.session_id.filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => format!(
            "http-{}",
            state.inner.session_counter.fetch_add(1, Ordering::SeqCst) + 1
        ),
    };

    // One-slot reply channel for this request.
    let (tx, mut rx) = mpsc::channel::<SlotValue>(1);
    state
        .inner
        .pending
        .lock()
        .unwrap()
        .insert(session_id.clone(), tx);

    // Dispatch on a task of its own; the reply comes back through the slot
    // via the channel's send path.
    let inner = Arc::clone(&state.inner);
    let handler = Arc::clone(&state.handler);
    let dispatch_session = session_id.clone();
    tokio::spawn(async move {
        let inbound =
            InboundMessage::new("http", &dispatch_session, "http-client", request.content);
        let value = match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
            Ok(outbound) => SlotValue::Reply(outbound),
            Err(e) => SlotValue::Failure(e.to_string()),
        };
        let sender = {
            let pending = inner.pending.lock().unwrap();
            pending.get(&dispatch_session).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.try_send(value);
        }
    });

    // Await the reply or the server-side slot timeout. A client disconnect
    // drops this future outright — there is nobody left to answer.
    let result = tokio::select! {
        value = rx.recv() => value,
        _ = tokio::time::sleep(Duration::from_secs(HTTP_PENDING_TIMEOUT_SECS)) => None,
    };

    // The slot is always removed on return.
    state.inner.pending.lock().unwrap().remove(&session_id);

    match result {
        Some(SlotValue::Reply(outbound)) if !outbound.is_error => (
            StatusCode::OK,
            Json(json!({"session_id": session_id, "content": outbound.content})),
        ),
        Some(SlotValue::Reply(outbound)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": outbound.content})),
        ),
        Some(SlotValue::Failure(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": error})),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("session not found: {session_id}")})),
        ),
    }
}
