//! Discord adapter — raw gateway WebSocket + REST send.
//!
//! The gateway session: receive HELLO (op 10), IDENTIFY (op 2), heartbeat
//! (op 1) at the server-given interval, then consume DISPATCH (op 0)
//! events. `READY` carries our own user id; `MESSAGE_CREATE` is the only
//! event routed into the pipeline. Any transport error tears the session
//! down and reconnects after the fixed 5 s back-off.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use alfred_core::config::{DiscordConfig, TextsConfig, FETCH_BACKOFF_SECS};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

/// GUILDS + GUILD_MESSAGES + DIRECT_MESSAGES + MESSAGE_CONTENT.
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);
/// Discord message length limit.
const DISCORD_MAX_LEN: usize = 2000;

struct DiscordInner {
    config: DiscordConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    bot_user_id: RwLock<Option<String>>,
}

/// Discord bot channel over the gateway.
pub struct DiscordChannel {
    inner: Arc<DiscordInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(DiscordInner {
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
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connecting;
        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                match DiscordInner::gateway_session(&inner, &handler, &shutdown).await {
                    Ok(()) => {
                        info!("discord gateway session ended");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "discord gateway error, reconnecting");
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
        let channel_id = require_session_id(msg)?;
        let content = msg.rendered_content();
        for chunk in crate::telegram::split_message(&content, DISCORD_MAX_LEN) {
            self.inner
                .create_message(channel_id, &chunk, msg.reply_to_id.as_deref())
                .await?;
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl DiscordInner {
    /// One gateway connection lifetime.
    async fn gateway_session(
        inner: &Arc<Self>,
        handler: &InboundHandler,
        shutdown: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(&inner.config.gateway_url).await?;
        let (write, mut read) = ws.split();
        let write = Arc::new(tokio::sync::Mutex::new(write));

        // HELLO must arrive first and carries the heartbeat interval.
        let hello = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)
                        .map_err(|e| ChannelError::api("discord", format!("bad hello: {e}")))?;
                    if value["op"].as_u64() == Some(10) {
                        break value;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ChannelError::api("discord", "gateway closed before hello")),
            }
        };
        let heartbeat_ms = hello["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);

        // IDENTIFY.
        let identify = json!({
            "op": 2,
            "d": {
                "token": inner.config.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {"os": "linux", "browser": "alfred", "device": "alfred"},
            }
        });
        write
            .lock()
            .await
            .send(WsMessage::Text(identify.to_string().into()))
            .await?;
        info!("discord gateway identified");

        // Heartbeat task shares the writer and the latest sequence number.
        let seq = Arc::new(Mutex::new(Value::Null));
        let heartbeat_seq = Arc::clone(&seq);
        let heartbeat_write = Arc::clone(&write);
        let heartbeat_shutdown = shutdown.clone();
        let heartbeat = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(heartbeat_ms));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let payload = json!({"op": 1, "d": heartbeat_seq.lock().unwrap().clone()});
                        let mut w = heartbeat_write.lock().await;
                        if w.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = heartbeat_shutdown.cancelled() => break,
                }
            }
        });

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => break Err(e.into()),
                        None => break Err(ChannelError::api("discord", "gateway closed")),
                    };
                    let WsMessage::Text(text) = frame else { continue };
                    let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };

                    match value["op"].as_u64() {
                        Some(0) => {
                            if !value["s"].is_null() {
                                *seq.lock().unwrap() = value["s"].clone();
                            }
                            inner.handle_dispatch(&value, handler).await;
                        }
                        // Reconnect / invalid session: tear down and redial.
                        Some(7) | Some(9) => {
                            break Err(ChannelError::api("discord", "server requested reconnect"));
                        }
                        _ => {}
                    }
                }
            }
        };

        heartbeat.abort();
        result
    }

    async fn handle_dispatch(self: &Arc<Self>, value: &Value, handler: &InboundHandler) {
        match value["t"].as_str() {
            Some("READY") => {
                if let Some(id) = value["d"]["user"]["id"].as_str() {
                    info!(bot = %id, "discord ready");
                    *self.bot_user_id.write().unwrap() = Some(id.to_string());
                }
            }
            Some("MESSAGE_CREATE") => {
                self.handle_message_create(&value["d"], handler).await;
            }
            _ => {}
        }
    }

    async fn handle_message_create(self: &Arc<Self>, data: &Value, handler: &InboundHandler) {
        let author_id = data["author"]["id"].as_str().unwrap_or_default().to_string();
        let bot_id = self.bot_user_id.read().unwrap().clone().unwrap_or_default();
        // Our own messages and other bots never re-enter the pipeline.
        if author_id.is_empty()
            || author_id == bot_id
            || data["author"]["bot"].as_bool() == Some(true)
        {
            return;
        }

        let guild_id = data["guild_id"].as_str().map(str::to_string);
        if let Some(allowed) = &self.config.guild_id {
            if guild_id.as_deref() != Some(allowed.as_str()) && guild_id.is_some() {
                debug!(guild = ?guild_id, "discord message outside allowed guild");
                return;
            }
        }

        let channel_id = data["channel_id"].as_str().unwrap_or_default().to_string();
        if channel_id.is_empty() {
            return;
        }
        let raw = data["content"].as_str().unwrap_or_default();
        if raw.is_empty() {
            return;
        }

        let is_mention = !bot_id.is_empty()
            && (raw.contains(&format!("<@{bot_id}>")) || raw.contains(&format!("<@!{bot_id}>")));
        let text = strip_mentions(raw, &bot_id);

        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "discord", &self.texts);
            if let Err(e) = self.create_message(&channel_id, &response, None).await {
                warn!(error = %e, "discord command reply failed");
            }
            return;
        }

        let in_guild = guild_id.is_some();
        if self.config.mention_only && in_guild && !is_mention {
            return;
        }
        if text.is_empty() {
            return;
        }

        let mut inbound = InboundMessage::new("discord", &channel_id, &author_id, &text);
        inbound.sender_name = data["author"]["username"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        inbound.group_id = in_guild.then(|| channel_id.clone());
        inbound.reply_to_id = data["id"].as_str().map(str::to_string);
        inbound.is_mention = is_mention;

        let inner = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                Ok(outbound) => {
                    let content = outbound.rendered_content();
                    for chunk in crate::telegram::split_message(&content, DISCORD_MAX_LEN) {
                        if let Err(e) = inner
                            .create_message(&channel_id, &chunk, outbound.reply_to_id.as_deref())
                            .await
                        {
                            warn!(error = %e, channel = %channel_id, "discord reply failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, channel = %channel_id, "discord dispatch failed"),
            }
        });
    }

    async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.config.api_base, channel_id);
        let mut body = json!({ "content": content });
        if let Some(reply_to) = reply_to {
            body["message_reference"] = json!({ "message_id": reply_to });
        }
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "discord",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(channel = %channel_id, "discord message sent");
        Ok(())
    }
}

/// Remove `<@id>` / `<@!id>` markers for our own id.
fn strip_mentions(text: &str, bot_id: &str) -> String {
    if bot_id.is_empty() {
        return text.trim().to_string();
    }
    text.replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inner(api_base: String, mention_only: bool, guild_id: Option<String>) -> Arc<DiscordInner> {
        Arc::new(DiscordInner {
            config: DiscordConfig {
                bot_token: "bot-token".into(),
                api_base,
                gateway_url: "wss://unused.invalid".into(),
                guild_id,
                mention_only,
            },
            texts: TextsConfig::default(),
            http: reqwest::Client::new(),
            bot_user_id: RwLock::new(Some("111".into())),
        })
    }

    fn message_create(content: &str, guild: Option<&str>, author: &str) -> Value {
        let mut data = json!({
            "id": "m1",
            "channel_id": "C42",
            "content": content,
            "author": {"id": author, "username": "frank", "bot": false}
        });
        if let Some(guild) = guild {
            data["guild_id"] = json!(guild);
        }
        data
    }

    #[tokio::test]
    async fn guild_message_replies_via_rest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/C42/messages"))
            .and(body_partial_json(json!({"content": "pong"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m2"})))
            .expect(1)
            .mount(&server)
            .await;

        let inner = inner(server.uri(), false, None);
        let handler = handler_fn(|_ctx, msg| async move {
            assert_eq!(msg.channel_name, "discord");
            assert_eq!(msg.session_id, "C42");
            Ok(OutboundMessage::reply_to(&msg, "pong"))
        });

        inner
            .handle_message_create(&message_create("ping", Some("G1"), "222"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn own_and_bot_messages_are_dropped() {
        let inner = inner("http://unused.invalid".into(), false, None);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        // Our own id.
        inner
            .handle_message_create(&message_create("echo", None, "111"), &handler)
            .await;
        // Another bot.
        let mut bot_msg = message_create("beep", None, "333");
        bot_msg["author"]["bot"] = json!(true);
        inner.handle_message_create(&bot_msg, &handler).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mention_only_gates_guild_but_not_dm() {
        let inner = inner("http://unused.invalid".into(), true, None);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        inner
            .handle_message_create(&message_create("chatter", Some("G1"), "222"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        inner
            .handle_message_create(&message_create("<@111> hello", Some("G1"), "222"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // DMs pass without a mention.
        inner
            .handle_message_create(&message_create("dm text", None, "222"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn guild_allow_list_filters() {
        let inner = inner("http://unused.invalid".into(), false, Some("G-ONLY".into()));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        inner
            .handle_message_create(&message_create("hi", Some("G-OTHER"), "222"), &handler)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mention_markers_are_stripped() {
        assert_eq!(strip_mentions("<@111> do it", "111"), "do it");
        assert_eq!(strip_mentions("<@!111> do it", "111"), "do it");
        assert_eq!(strip_mentions("plain", "111"), "plain");
    }
}
