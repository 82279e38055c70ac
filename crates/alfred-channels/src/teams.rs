//! Microsoft Teams adapter — Bot Framework webhook.
//!
//! Push variant: the Bot Framework POSTs activities to the bound listener,
//! which acks 200 immediately and processes in the background. Replies are
//! posted back to the `serviceUrl` carried by the inbound activity — the
//! value rides through `metadata["service_url"]` end-to-end, losing it
//! silently breaks replies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use alfred_core::config::{TeamsConfig, TextsConfig, MAX_WEBHOOK_BODY_BYTES};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};
use crate::token::{parse_token_response, TokenCache};

const TOKEN_SCOPE: &str = "https://api.botframework.com/.default";

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    text: Option<String>,
    from: Option<ActivityAccount>,
    conversation: Option<Conversation>,
    #[serde(rename = "serviceUrl")]
    service_url: Option<String>,
    #[serde(rename = "channelData")]
    channel_data: Option<ChannelData>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(rename = "replyToId")]
    reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivityAccount {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: Option<String>,
    #[serde(rename = "isGroup", default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelData {
    tenant: Option<ChannelDataTenant>,
}

#[derive(Debug, Deserialize)]
struct ChannelDataTenant {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    #[serde(rename = "type")]
    kind: Option<String>,
    mentioned: Option<Mentioned>,
}

#[derive(Debug, Deserialize)]
struct Mentioned {
    id: Option<String>,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct TeamsInner {
    config: TeamsConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    token: TokenCache,
}

struct WebhookState {
    inner: Arc<TeamsInner>,
    handler: InboundHandler,
}

/// Microsoft Teams channel via the Bot Framework connector.
pub struct TeamsChannel {
    inner: Arc<TeamsInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl TeamsChannel {
    pub fn new(config: TeamsConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(TeamsInner {
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
            .route("/api/messages", post(activity_handler))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
            .with_state(state)
    }
}

#[async_trait::async_trait]
impl Channel for TeamsChannel {
    fn name(&self) -> &str {
        "teams"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        let state = Arc::new(WebhookState {
            inner: Arc::clone(&self.inner),
            handler,
        });
        let app = Self::router(state);

        let listener = tokio::net::TcpListener::bind(&self.inner.config.webhook_addr).await?;
        info!(addr = %self.inner.config.webhook_addr, "teams webhook listening");
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let shutdown = self.lifecycle.begin();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "teams webhook server exited");
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
        let conversation = require_session_id(msg)?;
        let Some(service_url) = msg.metadata.get("service_url") else {
            return Err(ChannelError::InvalidOutbound(
                "teams outbound is missing metadata[\"service_url\"]".into(),
            ));
        };
        self.inner
            .send_activity(
                service_url,
                conversation,
                &msg.rendered_content(),
                msg.reply_to_id.as_deref(),
            )
            .await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

/// POST handler: 200 immediately, dispatch in the background.
async fn activity_handler(
    State(state): State<Arc<WebhookState>>,
    body: axum::body::Bytes,
) -> StatusCode {
    match serde_json::from_slice::<Activity>(&body) {
        Ok(activity) => {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.inner.handle_activity(activity, &state.handler).await;
            });
        }
        Err(e) => warn!(error = %e, "malformed teams activity"),
    }
    StatusCode::OK
}

impl TeamsInner {
    async fn handle_activity(&self, activity: Activity, handler: &InboundHandler) {
        if activity.kind.as_deref() != Some("message") {
            return;
        }
        let from_id = activity
            .from
            .as_ref()
            .and_then(|f| f.id.clone())
            .unwrap_or_default();
        // The connector echoes our own activities with the app id baked in.
        if from_id.contains(&self.config.app_id) {
            return;
        }

        if let Some(required) = &self.config.tenant_id {
            let tenant = activity
                .channel_data
                .as_ref()
                .and_then(|d| d.tenant.as_ref())
                .and_then(|t| t.id.as_deref());
            if tenant != Some(required.as_str()) {
                debug!(tenant = ?tenant, "teams activity outside allowed tenant");
                return;
            }
        }

        let Some(conversation) = activity
            .conversation
            .as_ref()
            .and_then(|c| c.id.clone())
        else {
            return;
        };
        let Some(service_url) = activity.service_url.clone() else {
            warn!("teams activity without serviceUrl, cannot reply");
            return;
        };

        let is_group = activity
            .conversation
            .as_ref()
            .map(|c| c.is_group)
            .unwrap_or(false);
        let text = strip_at_tags(activity.text.as_deref().unwrap_or_default());
        if text.is_empty() {
            return;
        }

        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "teams", &self.texts);
            if let Err(e) = self
                .send_activity(&service_url, &conversation, &response, None)
                .await
            {
                warn!(error = %e, "teams command reply failed");
            }
            return;
        }

        // Typed mention entities: entity.mentioned.id == our app id.
        let is_mention = activity.entities.iter().any(|e| {
            e.kind.as_deref() == Some("mention")
                && e.mentioned
                    .as_ref()
                    .and_then(|m| m.id.as_deref())
                    .map(|id| id.contains(&self.config.app_id))
                    .unwrap_or(false)
        });
        if self.config.mention_only && is_group && !is_mention {
            return;
        }

        let mut inbound = InboundMessage::new("teams", &conversation, &from_id, &text);
        inbound.sender_name = activity
            .from
            .as_ref()
            .and_then(|f| f.name.clone())
            .unwrap_or_default();
        inbound.group_id = is_group.then(|| conversation.clone());
        inbound.reply_to_id = activity.reply_to_id.or(activity.id);
        inbound.is_mention = is_mention;
        inbound
            .metadata
            .insert("service_url".into(), service_url.clone());

        match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
            Ok(outbound) => {
                // The reply's service_url comes from the round-tripped
                // metadata, not from any state on the channel.
                let url = outbound
                    .metadata
                    .get("service_url")
                    .cloned()
                    .unwrap_or(service_url);
                if let Err(e) = self
                    .send_activity(
                        &url,
                        &conversation,
                        &outbound.rendered_content(),
                        outbound.reply_to_id.as_deref(),
                    )
                    .await
                {
                    warn!(error = %e, conversation = %conversation, "teams reply failed");
                }
            }
            Err(e) => warn!(error = %e, conversation = %conversation, "teams dispatch failed"),
        }
    }

    async fn send_activity(
        &self,
        service_url: &str,
        conversation: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let token = self
            .token
            .get_access_token(|| self.exchange_token())
            .await?;

        let url = format!(
            "{}/v3/conversations/{}/activities",
            service_url.trim_end_matches('/'),
            conversation
        );
        let mut body = json!({ "type": "message", "text": text });
        if let Some(reply_to) = reply_to {
            body["replyToId"] = json!(reply_to);
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
                "teams",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(conversation, "teams message sent");
        Ok(())
    }

    /// Client-credentials exchange against the Bot Framework login host.
    async fn exchange_token(&self) -> Result<(String, i64)> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.app_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await?;
        let token = parse_token_response(resp).await?;
        Ok((token.access_token, token.expires_in))
    }
}

/// Remove `<at>…</at>` mention markup Teams embeds in the text.
fn strip_at_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<at>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</at>") {
            Some(end) => rest = &rest[start + end + "</at>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inner(token_url: String) -> TeamsInner {
        TeamsInner {
            config: TeamsConfig {
                webhook_addr: "127.0.0.1:0".into(),
                app_id: "app-123".into(),
                client_secret: "shh".into(),
                token_url,
                tenant_id: None,
                mention_only: false,
            },
            texts: TextsConfig::default(),
            http: reqwest::Client::new(),
            token: TokenCache::new(),
        }
    }

    #[test]
    fn at_tags_are_stripped() {
        assert_eq!(strip_at_tags("<at>Alfred</at> do it"), "do it");
        assert_eq!(strip_at_tags("plain text"), "plain text");
        assert_eq!(strip_at_tags("a <at>B</at> c <at>D</at> e"), "a  c  e");
    }

    #[tokio::test]
    async fn service_url_round_trips_into_reply() {
        let api = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "bf-token", "expires_in": 3600
            })))
            .mount(&api)
            .await;

        Mock::given(method("POST"))
            .and(path("/v3/conversations/conv-1/activities"))
            .and(body_partial_json(serde_json::json!({"type": "message", "text": "done"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "act-9"})))
            .expect(1)
            .mount(&api)
            .await;

        let inner = inner(format!("{}/token", api.uri()));
        let activity: Activity = serde_json::from_value(serde_json::json!({
            "type": "message",
            "id": "in-1",
            "text": "hello there",
            "from": {"id": "29:user", "name": "Eve"},
            "conversation": {"id": "conv-1"},
            "serviceUrl": api.uri(),
        }))
        .unwrap();

        let expected_url = api.uri();
        let handler = handler_fn(move |_ctx, msg| {
            let expected_url = expected_url.clone();
            async move {
                // The handler sees the service_url and the reply inherits it.
                assert_eq!(
                    msg.metadata.get("service_url").map(String::as_str),
                    Some(expected_url.as_str())
                );
                Ok(OutboundMessage::reply_to(&msg, "done"))
            }
        });
        inner.handle_activity(activity, &handler).await;
    }

    #[tokio::test]
    async fn own_activities_are_dropped() {
        let inner = inner("http://unused.invalid/token".into());
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        let activity: Activity = serde_json::from_value(serde_json::json!({
            "type": "message",
            "text": "echo",
            "from": {"id": "28:app-123"},
            "conversation": {"id": "conv-1"},
            "serviceUrl": "https://smba.example",
        }))
        .unwrap();
        inner.handle_activity(activity, &handler).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mention_entity_gates_group_messages() {
        let mut teams = inner("http://unused.invalid/token".into());
        teams.config.mention_only = true;
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        let unmentioned: Activity = serde_json::from_value(serde_json::json!({
            "type": "message",
            "text": "group chatter",
            "from": {"id": "29:user"},
            "conversation": {"id": "conv-1", "isGroup": true},
            "serviceUrl": "https://smba.example",
        }))
        .unwrap();
        teams.handle_activity(unmentioned, &handler).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_without_service_url_is_invalid() {
        let channel = TeamsChannel::new(
            TeamsConfig {
                webhook_addr: "127.0.0.1:0".into(),
                app_id: "app-123".into(),
                client_secret: "shh".into(),
                token_url: "http://unused.invalid/token".into(),
                tenant_id: None,
                mention_only: false,
            },
            TextsConfig::default(),
        );
        let msg = OutboundMessage {
            session_id: "conv-1".into(),
            content: "hi".into(),
            ..Default::default()
        };
        let err = channel.send(&msg).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidOutbound(_)));
    }
}
