//! Google Chat adapter — Chat app webhook + service-account sender.
//!
//! Push variant: Google POSTs room/DM events to the bound listener and the
//! handler acks 200 immediately. Replies go through the Chat REST API with
//! a service-account access token obtained via a signed RS256 JWT and
//! cached until shortly before expiry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use alfred_core::config::{GoogleChatConfig, TextsConfig, MAX_WEBHOOK_BODY_BYTES};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};
use crate::token::{parse_token_response, TokenCache};

/// OAuth scope of the Chat bot API.
const CHAT_SCOPE: &str = "https://www.googleapis.com/auth/chat.bot";
/// JWT lifetime requested from the token endpoint.
const JWT_LIFETIME_SECS: i64 = 55 * 60;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    name: Option<String>,
    text: Option<String>,
    #[serde(rename = "argumentText")]
    argument_text: Option<String>,
    sender: Option<ChatSender>,
    thread: Option<ChatThread>,
    space: Option<ChatSpace>,
}

#[derive(Debug, Deserialize)]
struct ChatSender {
    name: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatThread {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatSpace {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    scope: &'a str,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct GoogleChatInner {
    config: GoogleChatConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    token: TokenCache,
}

struct WebhookState {
    inner: Arc<GoogleChatInner>,
    handler: InboundHandler,
}

/// Google Chat app channel.
pub struct GoogleChatChannel {
    inner: Arc<GoogleChatInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl GoogleChatChannel {
    pub fn new(config: GoogleChatConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(GoogleChatInner {
                config,
                texts,
                http,
                token: TokenCache::new(),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn router(state: Arc<WebhookState>) -> Router {
        Router::new()
            .route("/", post(event_handler))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
            .with_state(state)
    }
}

#[async_trait::async_trait]
impl Channel for GoogleChatChannel {
    fn name(&self) -> &str {
        "googlechat"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        let state = Arc::new(WebhookState {
            inner: Arc::clone(&self.inner),
            handler,
        });
        let app = Self::router(state);

        let listener = tokio::net::TcpListener::bind(&self.inner.config.webhook_addr).await?;
        info!(addr = %self.inner.config.webhook_addr, "google chat webhook listening");
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let shutdown = self.lifecycle.begin();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "google chat webhook server exited");
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
        let space = require_session_id(msg)?;
        self.inner
            .send_text(space, &msg.rendered_content(), msg.thread_id.as_deref())
            .await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

/// POST handler: always 200, processing on a background task.
async fn event_handler(
    State(state): State<Arc<WebhookState>>,
    body: axum::body::Bytes,
) -> StatusCode {
    match serde_json::from_slice::<ChatEvent>(&body) {
        Ok(event) => {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.inner.handle_event(event, &state.handler).await;
            });
        }
        Err(e) => warn!(error = %e, "malformed google chat event"),
    }
    StatusCode::OK
}

impl GoogleChatInner {
    async fn handle_event(&self, event: ChatEvent, handler: &InboundHandler) {
        if event.kind.as_deref() != Some("MESSAGE") {
            return;
        }
        let Some(message) = event.message else { return };
        let Some(sender) = message.sender.as_ref() else {
            return;
        };
        // Messages from any Chat app (ourselves included) are dropped.
        if sender.kind.as_deref() == Some("BOT") {
            return;
        }

        let space_name = message
            .space
            .as_ref()
            .and_then(|s| s.name.clone())
            .unwrap_or_default();
        if space_name.is_empty() {
            return;
        }
        if let Some(allowed) = &self.config.space_id {
            if &space_name != allowed {
                debug!(space = %space_name, "google chat message outside allowed space");
                return;
            }
        }

        let is_room = message
            .space
            .as_ref()
            .and_then(|s| s.kind.as_deref())
            .map(|k| k != "DM")
            .unwrap_or(true);

        // In rooms the Chat API only fills argumentText when the app was
        // @mentioned — its presence is the mention signal.
        let argument = message
            .argument_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        let is_mention = is_room && !argument.is_empty();
        let text = if !argument.is_empty() {
            argument.to_string()
        } else {
            message.text.clone().unwrap_or_default()
        };
        if text.is_empty() {
            return;
        }

        let thread = message.thread.as_ref().and_then(|t| t.name.clone());

        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "googlechat", &self.texts);
            if let Err(e) = self
                .send_text(&space_name, &response, thread.as_deref())
                .await
            {
                warn!(error = %e, "google chat command reply failed");
            }
            return;
        }

        if self.config.mention_only && is_room && !is_mention {
            return;
        }

        let sender_id = sender.name.clone().unwrap_or_default();
        let mut inbound = InboundMessage::new("googlechat", &space_name, &sender_id, &text);
        inbound.sender_name = sender.display_name.clone().unwrap_or_default();
        inbound.group_id = is_room.then(|| space_name.clone());
        inbound.thread_id = thread;
        inbound.reply_to_id = message.name;
        inbound.is_mention = is_mention;

        match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
            Ok(outbound) => {
                if let Err(e) = self
                    .send_text(
                        &space_name,
                        &outbound.rendered_content(),
                        outbound.thread_id.as_deref(),
                    )
                    .await
                {
                    warn!(error = %e, space = %space_name, "google chat reply failed");
                }
            }
            Err(e) => warn!(error = %e, space = %space_name, "google chat dispatch failed"),
        }
    }

    async fn send_text(&self, space: &str, text: &str, thread: Option<&str>) -> Result<()> {
        // Space names are opaque but must at least be space resources.
        if !space.starts_with("spaces/") {
            return Err(ChannelError::InvalidOutbound(format!(
                "not a space name: {space}"
            )));
        }

        let token = self
            .token
            .get_access_token(|| self.exchange_token())
            .await?;

        let url = format!("{}/v1/{}/messages", self.config.api_base, space);
        let mut body = json!({ "text": text });
        if let Some(thread) = thread {
            body["thread"] = json!({ "name": thread });
        }

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "googlechat",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(space, "google chat message sent");
        Ok(())
    }

    /// Service-account JWT-bearer exchange. Returns (token, expires_in).
    async fn exchange_token(&self) -> Result<(String, i64)> {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &self.config.sa_email,
            sub: &self.config.sa_email,
            aud: &self.config.token_uri,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
            scope: CHAT_SCOPE,
        };

        let key = EncodingKey::from_rsa_pem(self.config.private_key.as_bytes())
            .map_err(|e| ChannelError::Auth(format!("bad service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ChannelError::Auth(format!("jwt signing failed: {e}")))?;

        let resp = self
            .http
            .post(&self.config.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let token = parse_token_response(resp).await?;
        Ok((token.access_token, token.expires_in))
    }
}
