//! Signal adapter — signal-cli REST API.
//!
//! Pull variant without a cursor: `GET /v1/receive/{phone}` drains the
//! server-side queue on every call, so there is no offset to track. The
//! receive call carries the long server-side timeout; errors back off 5 s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use alfred_core::config::{SignalConfig, TextsConfig, FETCH_BACKOFF_SECS, POLL_TIMEOUT_SECS};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SignalItem {
    envelope: Option<SignalEnvelope>,
}

#[derive(Debug, Deserialize)]
struct SignalEnvelope {
    source: Option<String>,
    #[serde(rename = "sourceName")]
    source_name: Option<String>,
    #[serde(rename = "dataMessage")]
    data_message: Option<SignalDataMessage>,
}

#[derive(Debug, Deserialize)]
struct SignalDataMessage {
    message: Option<String>,
    #[serde(rename = "groupInfo")]
    group_info: Option<SignalGroupInfo>,
}

#[derive(Debug, Deserialize)]
struct SignalGroupInfo {
    #[serde(rename = "groupId")]
    group_id: String,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct SignalInner {
    config: SignalConfig,
    texts: TextsConfig,
    http: reqwest::Client,
}

/// Signal channel via the signal-cli REST API.
pub struct SignalChannel {
    inner: Arc<SignalInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl SignalChannel {
    pub fn new(config: SignalConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(SignalInner {
                config,
                texts,
                http,
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait::async_trait]
impl Channel for SignalChannel {
    fn name(&self) -> &str {
        "signal"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        info!(phone = %self.inner.config.phone_number, "signal receive loop starting");

        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("signal receive loop stopped");
                        break;
                    }
                    fetched = inner.receive() => match fetched {
                        Ok(items) => {
                            for item in items {
                                inner.handle_item(item, &handler).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "signal receive error");
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
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let recipient = require_session_id(msg)?;
        self.inner.send_text(recipient, &msg.rendered_content()).await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl SignalInner {
    async fn receive(&self) -> Result<Vec<SignalItem>> {
        let url = format!(
            "{}/v1/receive/{}",
            self.config.api_url, self.config.phone_number
        );
        let resp = self
            .http
            .get(&url)
            .query(&[("timeout", POLL_TIMEOUT_SECS.to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "signal",
                format!("receive failed: HTTP {}", resp.status()),
            ));
        }
        Ok(resp.json().await?)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<()> {
        let url = format!("{}/v1/send", self.config.api_url);
        let body = json!({
            "number": self.config.phone_number,
            "recipients": [recipient],
            "message": text,
        });
        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "signal",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(recipient, "signal message sent");
        Ok(())
    }

    async fn handle_item(self: &Arc<Self>, item: SignalItem, handler: &InboundHandler) {
        let Some(envelope) = item.envelope else { return };
        let Some(source) = envelope.source else { return };
        // Drop our own sync messages.
        if source == self.config.phone_number {
            return;
        }
        let Some(data) = envelope.data_message else { return };
        let Some(text) = data.message.filter(|t| !t.is_empty()) else {
            return;
        };

        if !self.config.allow_users.is_empty()
            && !self.config.allow_users.iter().any(|u| u == &source)
        {
            warn!(sender = %source, "signal message from unauthorized number, ignoring");
            return;
        }

        // Group messages key the session by group id, DMs by the peer phone.
        let (session_id, group_id) = match data.group_info {
            Some(info) => (info.group_id.clone(), Some(info.group_id)),
            None => (source.clone(), None),
        };

        if let Some(reply) = commands::intercept(&text, false) {
            let response = commands::reply_text(reply, "signal", &self.texts);
            if let Err(e) = self.send_text(&session_id, &response).await {
                warn!(error = %e, "signal command reply failed");
            }
            return;
        }

        let mut inbound = InboundMessage::new("signal", &session_id, &source, &text);
        inbound.sender_name = envelope.source_name.unwrap_or_default();
        inbound.group_id = group_id;

        // Keep draining the receive queue while the agent works.
        let inner = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                Ok(outbound) => {
                    if let Err(e) = inner
                        .send_text(&session_id, &outbound.rendered_content())
                        .await
                    {
                        warn!(error = %e, session = %session_id, "signal reply failed");
                    }
                }
                Err(e) => warn!(error = %e, session = %session_id, "signal dispatch failed"),
            }
        });
    }
}
