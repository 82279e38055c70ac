//! Matrix adapter — client-server sync loop.
//!
//! Pull variant with a monotonic cursor: each `/sync` response carries
//! `next_batch`, passed back as `since` on the next call. Invited rooms are
//! joined before any timeline event is processed. Sends use per-instance
//! monotonic transaction ids so retried PUTs stay idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use alfred_core::config::{MatrixConfig, TextsConfig, FETCH_BACKOFF_SECS, MAX_SYNC_BODY_BYTES};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

/// Sync long-poll timeout in milliseconds, as sent to the server.
const SYNC_TIMEOUT_MS: u64 = 30_000;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRooms {
    #[serde(default)]
    invite: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    join: std::collections::HashMap<String, JoinedRoom>,
}

#[derive(Debug, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(default)]
    events: Vec<RoomEvent>,
}

#[derive(Debug, Deserialize)]
struct RoomEvent {
    #[serde(rename = "type")]
    kind: String,
    sender: Option<String>,
    event_id: Option<String>,
    #[serde(default)]
    content: serde_json::Value,
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct MatrixInner {
    config: MatrixConfig,
    texts: TextsConfig,
    http: reqwest::Client,
    txn_counter: AtomicU64,
}

/// Matrix channel over the v3 client-server API.
pub struct MatrixChannel {
    inner: Arc<MatrixInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl MatrixChannel {
    pub fn new(config: MatrixConfig, texts: TextsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            inner: Arc::new(MatrixInner {
                config,
                texts,
                http,
                txn_counter: AtomicU64::new(0),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait::async_trait]
impl Channel for MatrixChannel {
    fn name(&self) -> &str {
        "matrix"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        info!(user = %self.inner.config.user_id, "matrix sync loop starting");

        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut since: Option<String> = None;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("matrix sync loop stopped");
                        break;
                    }
                    synced = inner.sync(since.clone()) => match synced {
                        Ok(response) => {
                            since = Some(response.next_batch.clone());
                            inner.handle_sync(response, &handler).await;
                        }
                        Err(e) => {
                            error!(error = %e, "matrix sync error");
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
        let room_id = require_session_id(msg)?;
        self.inner.send_text(room_id, &msg.rendered_content()).await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl MatrixInner {
    async fn sync(&self, since: Option<String>) -> Result<SyncResponse> {
        let url = format!("{}/_matrix/client/v3/sync", self.config.homeserver);
        let mut query: Vec<(&str, String)> = vec![("timeout", SYNC_TIMEOUT_MS.to_string())];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "matrix",
                format!("sync failed: HTTP {}", resp.status()),
            ));
        }

        let body = resp.bytes().await?;
        if body.len() > MAX_SYNC_BODY_BYTES {
            return Err(ChannelError::api(
                "matrix",
                format!("sync body too large: {} bytes", body.len()),
            ));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ChannelError::api("matrix", format!("malformed sync body: {e}")))
    }

    async fn handle_sync(self: &Arc<Self>, response: SyncResponse, handler: &InboundHandler) {
        // Invites are accepted before any timeline event is processed.
        for room_id in response.rooms.invite.keys() {
            if let Err(e) = self.join_room(room_id).await {
                warn!(room = %room_id, error = %e, "matrix auto-join failed");
            }
        }

        for (room_id, room) in response.rooms.join {
            for event in room.timeline.events {
                self.handle_event(&room_id, event, handler).await;
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, room_id: &str, event: RoomEvent, handler: &InboundHandler) {
        if event.kind != "m.room.message" {
            return;
        }
        let Some(sender) = event.sender else { return };
        // Our own events come back on sync; never re-enter the pipeline.
        if sender == self.config.user_id {
            return;
        }
        if event.content.get("msgtype").and_then(|v| v.as_str()) != Some("m.text") {
            return;
        }
        let Some(body) = event.content.get("body").and_then(|v| v.as_str()) else {
            return;
        };

        if let Some(reply) = commands::intercept(body, false) {
            let response = commands::reply_text(reply, "matrix", &self.texts);
            if let Err(e) = self.send_text(room_id, &response).await {
                warn!(error = %e, "matrix command reply failed");
            }
            return;
        }

        // Mention detection: substring of our MXID anywhere in the body.
        let is_mention = body.contains(&self.config.user_id);
        if self.config.mention_only && !is_mention {
            return;
        }

        let mut inbound = InboundMessage::new("matrix", room_id, &sender, body);
        inbound.sender_name = sender.clone();
        inbound.group_id = Some(room_id.to_string());
        inbound.reply_to_id = event.event_id;
        inbound.is_mention = is_mention;

        // Keep the sync loop turning while the agent works.
        let inner = Arc::clone(self);
        let handler = Arc::clone(handler);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                Ok(outbound) => {
                    if let Err(e) = inner.send_text(&room_id, &outbound.rendered_content()).await {
                        warn!(error = %e, room = %room_id, "matrix reply failed");
                    }
                }
                Err(e) => warn!(error = %e, room = %room_id, "matrix dispatch failed"),
            }
        });
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        let url = format!(
            "{}/_matrix/client/v3/rooms/{}/join",
            self.config.homeserver, room_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "matrix",
                format!("join failed: HTTP {}", resp.status()),
            ));
        }
        info!(room = %room_id, "matrix room joined");
        Ok(())
    }

    async fn send_text(&self, room_id: &str, text: &str) -> Result<()> {
        let txn_id = self.next_txn_id();
        let url = format!(
            "{}/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
            self.config.homeserver, room_id, txn_id
        );
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.config.access_token)
            .json(&json!({ "msgtype": "m.text", "body": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChannelError::api(
                "matrix",
                format!("send failed: HTTP {}", resp.status()),
            ));
        }
        debug!(room = %room_id, txn = %txn_id, "matrix message sent");
        Ok(())
    }

    /// Monotonic per-instance transaction id.
    fn next_txn_id(&self) -> String {
        format!("alfred{}", self.txn_counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(homeserver: String) -> MatrixConfig {
        MatrixConfig {
            homeserver,
            access_token: "syt_token".into(),
            user_id: "@alfred:example.org".into(),
            mention_only: false,
        }
    }

    #[tokio::test]
    async fn invite_triggers_join_before_timeline() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "next_batch": "s1",
                        "rooms": {
                            "invite": {"!r:m.org": {}},
                            "join": {}
                        }
                    }))
                    .set_delay(Duration::from_millis(100)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"next_batch": "s2", "rooms": {}}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/rooms/!r:m.org/join"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"room_id": "!r:m.org"})))
            .expect(1)
            .mount(&server)
            .await;

        let channel = MatrixChannel::new(config(server.uri()), TextsConfig::default());
        channel
            .start(handler_fn(|_ctx, msg| async move {
                Ok(OutboundMessage::reply_to(&msg, "hi"))
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        channel.stop().await.unwrap();
    }

    #[tokio::test]
    async fn consecutive_sends_use_distinct_txn_ids() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(
                r"^/_matrix/client/v3/rooms/!r:m\.org/send/m\.room\.message/.+$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"event_id": "$e"})))
            .expect(2)
            .mount(&server)
            .await;

        let channel = MatrixChannel::new(config(server.uri()), TextsConfig::default());
        let msg = OutboundMessage {
            session_id: "!r:m.org".into(),
            content: "one".into(),
            ..Default::default()
        };
        channel.send(&msg).await.unwrap();
        channel.send(&msg).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
        assert_ne!(paths[0], paths[1], "txn ids must be distinct per send");
    }

    #[tokio::test]
    async fn own_events_are_dropped() {
        let inner = Arc::new(MatrixInner {
            config: config("http://unused".into()),
            texts: TextsConfig::default(),
            http: reqwest::Client::new(),
            txn_counter: AtomicU64::new(0),
        });

        let event: RoomEvent = serde_json::from_value(serde_json::json!({
            "type": "m.room.message",
            "sender": "@alfred:example.org",
            "content": {"msgtype": "m.text", "body": "echo of ourselves"}
        }))
        .unwrap();

        let called = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = Arc::clone(&called);
        let handler = handler_fn(move |_ctx, msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(OutboundMessage::reply_to(&msg, "x")) }
        });

        inner.handle_event("!r:m.org", event, &handler).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
