//! Per-connection WS state machine.
//!
//! Each accepted client gets a reader task and a writer task sharing a
//! bounded outbound queue. The writer applies a 5 s write deadline; the
//! reader dispatches every request frame on its own task. When either side
//! exits, the shared `done` token tears the connection down exactly once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alfred_core::config::{OUTBOUND_QUEUE_FRAMES, WS_WRITE_TIMEOUT_SECS};
use alfred_core::types::ClientInfo;
use alfred_protocol::Frame;

use crate::app::AppState;
use crate::auth;
use crate::ws::dispatch;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    tenant_id: Option<String>,
}

/// GET /ws — authenticated upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !auth::is_local_origin(origin) {
        warn!(origin = ?origin, "ws upgrade from non-local origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(token) = query.token.as_deref() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(client) = auth::authenticate(&state.config.gateway, token, query.tenant_id.as_deref())
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, client))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, client: ClientInfo) {
    let conn_id = state.conn_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let (queue_tx, queue_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE_FRAMES);
    state.connections.insert(conn_id, queue_tx.clone());
    info!(conn_id, client = %client.name, tenant = %client.tenant_id, "ws client connected");

    let (sink, stream) = socket.split();
    let done = CancellationToken::new();
    let writer = tokio::spawn(write_loop(
        sink,
        queue_rx,
        done.clone(),
        state.shutdown.clone(),
    ));

    read_loop(stream, &state, &client, &queue_tx, &done).await;

    done.cancel();
    let _ = writer.await;
    state.connections.remove(&conn_id);
    info!(conn_id, "ws client disconnected");
}

/// Drain the outbound queue onto the socket with a per-write deadline.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Frame>,
    done: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut going_away = false;
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = shutdown.cancelled() => {
                going_away = true;
                break;
            }
            frame = queue.recv() => {
                let Some(frame) = frame else { break };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                let write = sink.send(Message::Text(json.into()));
                match tokio::time::timeout(Duration::from_secs(WS_WRITE_TIMEOUT_SECS), write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "ws write failed");
                        break;
                    }
                    Err(_) => {
                        warn!("ws write deadline exceeded");
                        break;
                    }
                }
            }
        }
    }

    // Either task exiting tears the whole connection down; cancelling is
    // idempotent so the reader racing us here is fine.
    done.cancel();

    let code = if going_away {
        close_code::AWAY
    } else {
        close_code::NORMAL
    };
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await;
}

/// Consume frames from the client. Non-request frames are ignored; each
/// request is dispatched concurrently so one slow call never blocks the
/// socket.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    client: &ClientInfo,
    queue: &mpsc::Sender<Frame>,
    done: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame: Frame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "malformed frame, ignoring");
                                continue;
                            }
                        };
                        if !frame.is_request() {
                            continue;
                        }
                        let Some(id) = frame.id else { continue };
                        let method = frame.method.unwrap_or_default();
                        let payload = frame.payload.unwrap_or(serde_json::Value::Null);

                        let state = Arc::clone(state);
                        let client = client.clone();
                        let queue = queue.clone();
                        tokio::spawn(async move {
                            let response =
                                match dispatch::dispatch(&state, &client, &method, payload).await {
                                    Ok(result) => Frame::response(id, result),
                                    Err(e) => Frame::error_response(id, e.to_string()),
                                };
                            // Slow consumer: the response is dropped, not queued.
                            if queue.try_send(response).is_err() {
                                warn!(request = id, "outbound queue full, dropping response");
                            }
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "ws read failed");
                        break;
                    }
                }
            }
        }
    }
}
