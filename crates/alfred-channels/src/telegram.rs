//! Telegram adapter — Bot API long polling.
//!
//! A background loop drives `getUpdates` with a 30 s server-side timeout and
//! `offset = max(update_id)+1`, so each update is seen exactly once and
//! empty polls don't busy-loop. Fetch errors are logged and retried after a
//! fixed 5 s back-off; they never kill the loop.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use alfred_core::config::{TelegramConfig, TextsConfig, FETCH_BACKOFF_SECS, POLL_TIMEOUT_SECS};
use alfred_core::types::{
    InboundMessage, Media, MediaKind, OutboundMessage, RequestContext, DEFAULT_TENANT,
};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

/// Telegram message length limit.
const TELEGRAM_MAX_LEN: usize = 4096;

#[derive(Debug, Clone)]
struct BotIdentity {
    id: i64,
    username: String,
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    entities: Option<Vec<TgEntity>>,
    photo: Option<Vec<TgPhotoSize>>,
    document: Option<TgDocument>,
    voice: Option<TgVoice>,
    audio: Option<TgVoice>,
    message_thread_id: Option<i64>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    username: Option<String>,
    #[serde(default)]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TgEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    length: usize,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgDocument {
    file_id: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgVoice {
    file_id: String,
    mime_type: Option<String>,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct TelegramInner {
    config: TelegramConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    bot: RwLock<Option<BotIdentity>>,
}

/// Telegram bot channel using long polling — no public URL required.
pub struct TelegramChannel {
    inner: Arc<TelegramInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(TelegramInner {
                config,
                texts,
                http,
                bot: RwLock::new(None),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait::async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        self.set_status(ChannelStatus::Connecting);

        // Resolve our own identity once: it drives mention detection and
        // drops our own messages.
        let me = self.inner.get_me().await?;
        info!(username = %me.username, "telegram connected");
        *self.inner.bot.write().unwrap() = Some(me);
        self.set_status(ChannelStatus::Connected);

        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("telegram receive loop stopped");
                        break;
                    }
                    fetched = inner.get_updates(offset) => match fetched {
                        Ok(updates) => {
                            for update in updates {
                                // Strictly greater than any seen update id.
                                offset = offset.max(update.update_id + 1);
                                inner.handle_update(update, &handler).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "telegram polling error");
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(FETCH_BACKOFF_SECS)) => {}
                                _ = shutdown.cancelled() => break,
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.end();
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let chat_id = require_session_id(msg)?;
        let content = msg.rendered_content();
        let reply_to = msg.reply_to_id.as_deref().and_then(|s| s.parse::<i64>().ok());
        let thread = msg.thread_id.as_deref().and_then(|s| s.parse::<i64>().ok());

        for chunk in split_message(&content, TELEGRAM_MAX_LEN) {
            self.inner.send_message(chat_id, &chunk, thread, reply_to).await?;
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl TelegramInner {
    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base, self.config.bot_token, method
        )
    }

    async fn get_me(&self) -> Result<BotIdentity> {
        let resp: ApiResponse<TgUser> = self
            .http
            .get(self.api_url("getMe"))
            .send()
            .await?
            .json()
            .await?;
        let user = match (resp.ok, resp.result) {
            (true, Some(user)) => user,
            _ => {
                return Err(ChannelError::api(
                    "telegram",
                    resp.description.unwrap_or_else(|| "getMe failed".into()),
                ))
            }
        };
        Ok(BotIdentity {
            id: user.id,
            username: user.username.unwrap_or_default(),
        })
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>> {
        let resp: ApiResponse<Vec<TgUpdate>> = self
            .http
            .get(self.api_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", POLL_TIMEOUT_SECS.to_string())])
            .send()
            .await?
            .json()
            .await?;
        match (resp.ok, resp.result) {
            (true, Some(updates)) => Ok(updates),
            _ => Err(ChannelError::api(
                "telegram",
                resp.description.unwrap_or_else(|| "getUpdates failed".into()),
            )),
        }
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        thread: Option<i64>,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(thread) = thread {
            body["message_thread_id"] = json!(thread);
        }
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = json!(reply_to);
        }

        let resp: ApiResponse<serde_json::Value> = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if !resp.ok {
            return Err(ChannelError::api(
                "telegram",
                resp.description.unwrap_or_else(|| "sendMessage failed".into()),
            ));
        }
        debug!(chat_id, "telegram message sent");
        Ok(())
    }

    async fn handle_update(self: &Arc<Self>, update: TgUpdate, handler: &InboundHandler) {
        let Some(message) = update.message else {
            return;
        };
        let Some(from) = message.from.as_ref() else {
            return;
        };
        // Our own (and any bot's) messages never re-enter the pipeline.
        if from.is_bot {
            return;
        }

        let username = from.username.clone().unwrap_or_default();
        let user_id = from.id.to_string();
        if !is_allowed(&self.config.allow_users, &user_id, &username) {
            warn!(sender = %user_id, "telegram message from unauthorized user, ignoring");
            return;
        }

        let chat_id = message.chat.id.to_string();
        let is_group = matches!(message.chat.kind.as_str(), "group" | "supergroup");
        let text = message
            .text
            .clone()
            .or_else(|| message.caption.clone())
            .unwrap_or_default();

        // Commands answer before mention-gating and dispatch.
        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "telegram", &self.texts);
            if let Err(e) = self.send_message(&chat_id, &response, None, None).await {
                warn!(error = %e, "telegram command reply failed");
            }
            return;
        }

        let bot = self.bot.read().unwrap().clone();
        let is_mention = bot
            .as_ref()
            .map(|b| has_mention(&text, message.entities.as_deref().unwrap_or(&[]), &b.username))
            .unwrap_or(false);
        if self.config.mention_only && is_group && !is_mention {
            return;
        }

        let media = extract_media(&message);
        if text.is_empty() && media.is_empty() {
            return;
        }

        let mut inbound = InboundMessage::new("telegram", &chat_id, &user_id, &text);
        inbound.sender_name = if from.first_name.is_empty() {
            username.clone()
        } else {
            from.first_name.clone()
        };
        inbound.group_id = is_group.then(|| chat_id.clone());
        inbound.thread_id = message.message_thread_id.map(|t| t.to_string());
        inbound.reply_to_id = message
            .reply_to_message
            .as_ref()
            .map(|m| m.message_id.to_string());
        inbound.is_mention = is_mention;
        inbound.media = media;

        // Run the turn off the polling loop so a slow agent never stalls
        // getUpdates for other chats.
        let inner = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                Ok(outbound) => {
                    let content = outbound.rendered_content();
                    let reply_to = outbound
                        .reply_to_id
                        .as_deref()
                        .and_then(|s| s.parse::<i64>().ok());
                    let thread = outbound
                        .thread_id
                        .as_deref()
                        .and_then(|s| s.parse::<i64>().ok());
                    for chunk in split_message(&content, TELEGRAM_MAX_LEN) {
                        if let Err(e) = inner.send_message(&chat_id, &chunk, thread, reply_to).await
                        {
                            warn!(error = %e, chat_id, "telegram reply failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, chat_id, "telegram dispatch failed"),
            }
        });
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Empty allow-list means everyone; otherwise match user id or username.
fn is_allowed(allow: &[String], user_id: &str, username: &str) -> bool {
    allow.is_empty() || allow.iter().any(|u| u == user_id || u == username)
}

/// Mention detection via entity offsets: an entity of type `mention` whose
/// text equals `@<bot_username>` case-insensitively. Telegram entity
/// offsets are in UTF-16 code units.
fn has_mention(text: &str, entities: &[TgEntity], bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let wanted = format!("@{}", bot_username.to_lowercase());
    let units: Vec<u16> = text.encode_utf16().collect();
    entities.iter().any(|e| {
        if e.kind != "mention" {
            return false;
        }
        let end = e.offset + e.length;
        if end > units.len() {
            return false;
        }
        String::from_utf16_lossy(&units[e.offset..end]).to_lowercase() == wanted
    })
}

/// Normalise Telegram media to the common shape. Photo arrays are size
/// variants of one image — keep the largest (last).
fn extract_media(message: &TgMessage) -> Vec<Media> {
    let mut media = Vec::new();
    if let Some(photo) = message.photo.as_ref().and_then(|sizes| sizes.last()) {
        media.push(Media {
            kind: MediaKind::Image,
            url: photo.file_id.clone(),
            mime_type: None,
            caption: message.caption.clone(),
        });
    }
    if let Some(doc) = &message.document {
        media.push(Media {
            kind: MediaKind::File,
            url: doc.file_id.clone(),
            mime_type: doc.mime_type.clone(),
            caption: message.caption.clone(),
        });
    }
    for audio in [&message.voice, &message.audio].into_iter().flatten() {
        media.push(Media {
            kind: MediaKind::Audio,
            url: audio.file_id.clone(),
            mime_type: audio.mime_type.clone(),
            caption: None,
        });
    }
    media
}

/// Split text into chunks of at most `max` characters, preferring newline
/// boundaries.
pub(crate) fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            // A single oversized line is split hard.
            let mut piece = String::new();
            let mut piece_len = 0usize;
            for c in line.chars() {
                if piece_len == max {
                    chunks.push(std::mem::take(&mut piece));
                    piece_len = 0;
                }
                piece.push(c);
                piece_len += 1;
            }
            current = piece;
            current_len = piece_len;
        } else {
            current.push_str(line);
            current_len += line_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
