//! WhatsApp adapter — Meta Cloud API webhook.
//!
//! Push variant: a bound listener accepts Meta's POSTs, validates the
//! `X-Hub-Signature-256` HMAC over the raw body, and answers 200
//! immediately in every case — Meta retries aggressively on non-2xx and
//! cancels its request the moment it has a response. Processing happens on
//! a background task tied to the channel lifetime, not the request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, warn};

use alfred_core::config::{TextsConfig, WhatsAppConfig, MAX_WEBHOOK_BODY_BYTES};
use alfred_core::types::{
    InboundMessage, Media, MediaKind, OutboundMessage, RequestContext, DEFAULT_TENANT,
};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

type HmacSha256 = Hmac<Sha256>;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    messages: Vec<WaMessage>,
    #[serde(default)]
    contacts: Vec<WaContact>,
}

#[derive(Debug, Deserialize)]
struct WaContact {
    profile: Option<WaProfile>,
}

#[derive(Debug, Deserialize)]
struct WaProfile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    from: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<WaText>,
    image: Option<WaMedia>,
    document: Option<WaMedia>,
    audio: Option<WaMedia>,
    context: Option<WaContext>,
}

#[derive(Debug, Deserialize)]
struct WaText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct WaMedia {
    id: Option<String>,
    mime_type: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaContext {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct WhatsAppInner {
    config: WhatsAppConfig,
    texts: TextsConfig,
    http: reqwest::Client,
}

struct WebhookState {
    inner: Arc<WhatsAppInner>,
    handler: InboundHandler,
}

/// WhatsApp Business Cloud channel.
pub struct WhatsAppChannel {
    inner: Arc<WhatsAppInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(WhatsAppInner {
                config,
                texts,
                http,
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn router(state: Arc<WebhookState>) -> Router {
        Router::new()
            .route("/webhook", get(verify_handler).post(webhook_handler))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
            .with_state(state)
    }
}

#[async_trait::async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        let state = Arc::new(WebhookState {
            inner: Arc::clone(&self.inner),
            handler,
        });
        let app = Self::router(state);

        let listener = tokio::net::TcpListener::bind(&self.inner.config.webhook_addr).await?;
        info!(addr = %self.inner.config.webhook_addr, "whatsapp webhook listening");
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let shutdown = self.lifecycle.begin();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "whatsapp webhook server exited");
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
        let to = require_session_id(msg)?;
        self.inner.send_text(to, &msg.rendered_content()).await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

// ── HTTP handlers ────────────────────────────────────────────────────────────

/// GET verification challenge: echo `hub.challenge` iff the verify token
/// matches.
async fn verify_handler(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    let token_ok = params.verify_token.as_deref() == Some(&state.inner.config.verify_token);
    if params.mode.as_deref() == Some("subscribe") && token_ok {
        let challenge = params.challenge.unwrap_or_default();
        debug!("whatsapp webhook verified");
        return (StatusCode::OK, challenge);
    }
    (StatusCode::FORBIDDEN, String::new())
}

/// POST webhook: validate the signature, ack 200 immediately, process in
/// the background. Malformed payloads are logged and still acked — a
/// non-2xx would only trigger retries of the same bad payload.
async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.inner.config.app_secret, &body, signature) {
        warn!("whatsapp webhook signature mismatch, ignoring payload");
        return StatusCode::OK;
    }

    match serde_json::from_slice::<WebhookBody>(&body) {
        Ok(payload) => {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.inner.process(payload, &state.handler).await;
            });
        }
        Err(e) => warn!(error = %e, "malformed whatsapp webhook body"),
    }
    StatusCode::OK
}

/// Constant-time HMAC-SHA256 check of `sha256=<hex>` over the raw body.
fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else { return false };
    let Some(sig_hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(sig_hex) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

impl WhatsAppInner {
    async fn process(&self, payload: WebhookBody, handler: &InboundHandler) {
        for entry in payload.entry {
            for change in entry.changes {
                let Some(value) = change.value else { continue };
                let sender_name = value
                    .contacts
                    .first()
                    .and_then(|c| c.profile.as_ref())
                    .and_then(|p| p.name.clone())
                    .unwrap_or_default();
                for message in value.messages {
                    self.handle_message(message, &sender_name, handler).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: WaMessage, sender_name: &str, handler: &InboundHandler) {
        let from = message.from.clone();
        let (text, media) = extract_content(&message);
        if text.is_empty() && media.is_empty() {
            return;
        }

        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "whatsapp", &self.texts);
            if let Err(e) = self.send_text(&from, &response).await {
                warn!(error = %e, "whatsapp command reply failed");
            }
            return;
        }

        let mut inbound = InboundMessage::new("whatsapp", &from, &from, &text);
        inbound.sender_name = sender_name.to_string();
        inbound.reply_to_id = message.context.and_then(|c| c.id);
        inbound.media = media;

        match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
            Ok(outbound) => {
                if let Err(e) = self.send_text(&from, &outbound.rendered_content()).await {
                    warn!(error = %e, to = %from, "whatsapp reply failed");
                }
            }
            Err(e) => warn!(error = %e, to = %from, "whatsapp dispatch failed"),
        }
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let url = format!(
            "{}/v21.0/{}/messages",
            self.config.api_base, self.config.phone_id
        );
        let body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": text },
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "whatsapp",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(to, "whatsapp message sent");
        Ok(())
    }
}

/// Text plus normalised media. A media caption becomes the content when
/// there is no text body.
fn extract_content(message: &WaMessage) -> (String, Vec<Media>) {
    let mut media = Vec::new();
    let mut text = message
        .text
        .as_ref()
        .map(|t| t.body.clone())
        .unwrap_or_default();

    let mut push = |kind: MediaKind, m: &WaMedia| {
        media.push(Media {
            kind,
            url: m.id.clone().unwrap_or_default(),
            mime_type: m.mime_type.clone(),
            caption: m.caption.clone(),
        });
        if text.is_empty() {
            if let Some(caption) = &m.caption {
                text = caption.clone();
            }
        }
    };

    match message.kind.as_str() {
        "image" => {
            if let Some(m) = &message.image {
                push(MediaKind::Image, m);
            }
        }
        "document" => {
            if let Some(m) = &message.document {
                push(MediaKind::File, m);
            }
        }
        "audio" => {
            if let Some(m) = &message.audio {
                push(MediaKind::Audio, m);
            }
        }
        _ => {}
    }

    (text, media)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::ServiceExt;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn state_with_counter() -> (Arc<WebhookState>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let inner = Arc::new(WhatsAppInner {
            config: WhatsAppConfig {
                webhook_addr: "127.0.0.1:0".into(),
                access_token: "tok".into(),
                phone_id: "123".into(),
                app_secret: "s3cr3t".into(),
                verify_token: "verifyme".into(),
                api_base: "http://unused.invalid".into(),
            },
            texts: TextsConfig::default(),
            http: reqwest::Client::new(),
        });
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "ok")) }
        });
        (Arc::new(WebhookState { inner, handler }), counter)
    }

    fn message_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "entry": [{"changes": [{"value": {
                "contacts": [{"profile": {"name": "Cara"}}],
                "messages": [{"from": "15551230000", "id": "wamid.1", "type": "text",
                              "text": {"body": "hello"}}]
            }}]}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn valid_signature_dispatches_and_acks() {
        let (state, counter) = state_with_counter();
        let app = WhatsAppChannel::router(Arc::clone(&state));
        let body = message_body();

        let request = axum::http::Request::post("/webhook")
            .header("x-hub-signature-256", sign("s3cr3t", &body))
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // Dispatch happens on a background task; the reply send will fail
        // against the unused API base but the handler must have run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_signature_still_acks_but_never_dispatches() {
        let (state, counter) = state_with_counter();
        let app = WhatsAppChannel::router(Arc::clone(&state));
        let body = message_body();

        let request = axum::http::Request::post("/webhook")
            .header("x-hub-signature-256", "sha256=invalid")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn challenge_echoed_only_with_matching_token() {
        let (state, _) = state_with_counter();

        let app = WhatsAppChannel::router(Arc::clone(&state));
        let ok = app
            .oneshot(
                axum::http::Request::get(
                    "/webhook?hub.mode=subscribe&hub.verify_token=verifyme&hub.challenge=1158201444",
                )
                .body(axum::body::Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(ok.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"1158201444");

        let app = WhatsAppChannel::router(state);
        let bad = app
            .oneshot(
                axum::http::Request::get(
                    "/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=x",
                )
                .body(axum::body::Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn signature_rejects_garbage() {
        assert!(!verify_signature("s", b"body", None));
        assert!(!verify_signature("s", b"body", Some("md5=abc")));
        assert!(!verify_signature("s", b"body", Some("sha256=zzzz")));
    }

    #[test]
    fn caption_becomes_content_when_text_empty() {
        let message: WaMessage = serde_json::from_value(serde_json::json!({
            "from": "15551230000",
            "type": "image",
            "image": {"id": "media-1", "mime_type": "image/jpeg", "caption": "look at this"}
        }))
        .unwrap();
        let (text, media) = extract_content(&message);
        assert_eq!(text, "look at this");
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Image);
    }
}
