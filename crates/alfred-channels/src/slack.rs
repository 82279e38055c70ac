//! Slack adapter — Socket Mode WebSocket + Web API.
//!
//! Events arrive over a Socket Mode connection obtained from
//! `apps.connections.open`; every envelope is ACKed immediately. Replies go
//! through `chat.postMessage`. The connection reconnects after the fixed
//! 5 s back-off on any transport error.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use alfred_core::config::{SlackConfig, TextsConfig, FETCH_BACKOFF_SECS};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

/// Slack message length limit for `chat.postMessage`.
const SLACK_MAX_LEN: usize = 4000;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    kind: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    user: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    channel_type: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    bot_id: Option<String>,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct SlackInner {
    config: SlackConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    bot_user_id: RwLock<Option<String>>,
}

/// Slack channel using Socket Mode + Web API. No public URL required.
pub struct SlackChannel {
    inner: Arc<SlackInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl SlackChannel {
    pub fn new(config: SlackConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(SlackInner {
                config,
                texts,
                http,
                bot_user_id: RwLock::new(None),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait::async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connecting;

        // Our own user id drives mention markers and self-filtering.
        let bot_id = self.inner.auth_test().await?;
        info!(bot = %bot_id, "slack authenticated");
        *self.inner.bot_user_id.write().unwrap() = Some(bot_id);
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                match SlackInner::socket_session(&inner, &handler, &shutdown).await {
                    Ok(()) => {
                        info!("slack socket session ended");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "slack socket error, reconnecting");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(FETCH_BACKOFF_SECS)) => {}
                            _ = shutdown.cancelled() => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.end();
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let channel = require_session_id(msg)?;
        // Slack localises the error badge.
        let content = if msg.is_error {
            format!(":warning: Error: {}", msg.content)
        } else {
            msg.content.clone()
        };
        for chunk in crate::telegram::split_message(&content, SLACK_MAX_LEN) {
            self.inner
                .post_message(channel, &chunk, msg.thread_id.as_deref())
                .await?;
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl SlackInner {
    /// `auth.test` resolves the bot's own user id.
    async fn auth_test(&self) -> Result<String> {
        let body: Value = self
            .http
            .post(format!("{}/auth.test", self.config.api_base))
            .bearer_auth(&self.config.bot_token)
            .send()
            .await?
            .json()
            .await?;
        if body["ok"].as_bool() != Some(true) {
            return Err(ChannelError::api(
                "slack",
                format!("auth.test failed: {}", body["error"].as_str().unwrap_or("unknown")),
            ));
        }
        body["user_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::api("slack", "auth.test returned no user_id"))
    }

    /// `apps.connections.open` yields the Socket Mode WS URL.
    async fn open_socket_url(&self) -> Result<String> {
        let body: Value = self
            .http
            .post(format!("{}/apps.connections.open", self.config.api_base))
            .bearer_auth(&self.config.app_token)
            .send()
            .await?
            .json()
            .await?;
        if body["ok"].as_bool() != Some(true) {
            return Err(ChannelError::api(
                "slack",
                format!(
                    "apps.connections.open failed: {}",
                    body["error"].as_str().unwrap_or("unknown")
                ),
            ));
        }
        body["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::api("slack", "no url in apps.connections.open"))
    }

    /// One Socket Mode connection lifetime.
    async fn socket_session(
        inner: &Arc<Self>,
        handler: &InboundHandler,
        shutdown: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let url = inner.open_socket_url().await?;
        let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
        info!("slack socket mode connected");
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ChannelError::api("slack", "socket closed")),
                    };
                    let WsMessage::Text(text) = frame else { continue };
                    let Ok(envelope) = serde_json::from_str::<SocketEnvelope>(&text) else {
                        continue;
                    };

                    // Envelopes must be ACKed before Slack's redelivery timer.
                    if let Some(envelope_id) = &envelope.envelope_id {
                        let ack = json!({ "envelope_id": envelope_id }).to_string();
                        write.send(WsMessage::Text(ack.into())).await?;
                    }

                    match envelope.kind.as_str() {
                        "events_api" => {
                            if let Ok(event) = serde_json::from_value::<SlackEvent>(
                                envelope.payload["event"].clone(),
                            ) {
                                inner.handle_event(event, handler).await;
                            }
                        }
                        "disconnect" => {
                            return Err(ChannelError::api("slack", "server requested reconnect"));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: SlackEvent, handler: &InboundHandler) {
        // `app_mention` duplicates the `message` event for mentions.
        if event.kind != "message" {
            return;
        }
        // Bot-authored messages (including our own) never re-enter.
        if event.bot_id.is_some() {
            return;
        }
        let Some(user) = event.user else { return };
        let Some(channel) = event.channel else { return };
        let Some(text) = event.text.filter(|t| !t.is_empty()) else {
            return;
        };

        let is_dm = event.channel_type.as_deref() == Some("im");
        if !is_dm
            && !self.config.channel_ids.is_empty()
            && !self.config.channel_ids.iter().any(|c| c == &channel)
        {
            debug!(channel = %channel, "slack message outside channel allow-set");
            return;
        }

        let bot_id = self.bot_user_id.read().unwrap().clone().unwrap_or_default();
        let marker = format!("<@{bot_id}>");
        let is_mention = !bot_id.is_empty() && text.contains(&marker);
        let clean = text.replace(&marker, "").trim().to_string();

        if let Some(reply) = commands::intercept(&clean, false) {
            let response = commands::reply_text(reply, "slack", &self.texts);
            if let Err(e) = self
                .post_message(&channel, &response, event.thread_ts.as_deref())
                .await
            {
                warn!(error = %e, "slack command reply failed");
            }
            return;
        }

        if self.config.mention_only && !is_dm && !is_mention {
            return;
        }
        if clean.is_empty() {
            return;
        }

        let mut inbound = InboundMessage::new("slack", &channel, &user, &clean);
        inbound.group_id = (!is_dm).then(|| channel.clone());
        inbound.thread_id = event.thread_ts.or(event.ts);
        inbound.is_mention = is_mention;

        let inner = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                Ok(outbound) => {
                    let content = if outbound.is_error {
                        format!(":warning: Error: {}", outbound.content)
                    } else {
                        outbound.content
                    };
                    if let Err(e) = inner
                        .post_message(&channel, &content, outbound.thread_id.as_deref())
                        .await
                    {
                        warn!(error = %e, channel = %channel, "slack reply failed");
                    }
                }
                Err(e) => warn!(error = %e, channel = %channel, "slack dispatch failed"),
            }
        });
    }

    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<()> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }
        let resp: Value = self
            .http
            .post(format!("{}/chat.postMessage", self.config.api_base))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if resp["ok"].as_bool() != Some(true) {
            return Err(ChannelError::api(
                "slack",
                format!(
                    "chat.postMessage failed: {}",
                    resp["error"].as_str().unwrap_or("unknown")
                ),
            ));
        }
        debug!(channel, "slack message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inner(api_base: String, mention_only: bool) -> Arc<SlackInner> {
        Arc::new(SlackInner {
            config: SlackConfig {
                bot_token: "xoxb-test".into(),
                app_token: "xapp-test".into(),
                api_base,
                mention_only,
                channel_ids: vec![],
            },
            texts: TextsConfig::default(),
            http: reqwest::Client::new(),
            bot_user_id: RwLock::new(Some("U0BOT".into())),
        })
    }

    fn event(text: &str, channel_type: &str) -> SlackEvent {
        serde_json::from_value(serde_json::json!({
            "type": "message",
            "user": "U123",
            "text": text,
            "channel": "C777",
            "channel_type": channel_type,
            "ts": "1726000000.000100"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn error_reply_carries_warning_badge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(serde_json::json!({
                "channel": "C777",
                "text": ":warning: Error: agent failed"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(
            SlackConfig {
                bot_token: "xoxb".into(),
                app_token: "xapp".into(),
                api_base: server.uri(),
                mention_only: false,
                channel_ids: vec![],
            },
            TextsConfig::default(),
        );
        let msg = OutboundMessage {
            session_id: "C777".into(),
            content: "agent failed".into(),
            is_error: true,
            ..Default::default()
        };
        channel.send(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn mention_only_gates_channels_not_dms() {
        let inner = inner("http://unused.invalid".into(), true);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        // Channel message without the mention marker: dropped.
        inner.handle_event(event("hello all", "channel"), &handler).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // DM without a mention: dispatched.
        inner.handle_event(event("hello bot", "im"), &handler).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Channel message with the marker: dispatched, marker stripped.
        inner
            .handle_event(event("<@U0BOT> status please", "channel"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bot_messages_are_dropped() {
        let inner = inner("http://unused.invalid".into(), false);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        let bot_event: SlackEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "bot_id": "B999",
            "user": "U0BOT",
            "text": "our own reply",
            "channel": "C777",
            "channel_type": "channel"
        }))
        .unwrap();
        inner.handle_event(bot_event, &handler).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
