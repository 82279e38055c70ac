//! `chat.*` — drive the agent pipeline from the control plane.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use alfred_bus::{Event, EventType};
use alfred_core::types::{ClientInfo, InboundMessage, RequestContext};
use alfred_core::{AlfredError, Result};

use crate::app::AppState;

/// Channel tag for conversations initiated over the RPC surface.
const GATEWAY_CHANNEL: &str = "gateway";

#[derive(Debug, Deserialize)]
struct SendPayload {
    session_id: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AbortPayload {
    session_id: String,
}

pub async fn send(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    run_turn(state, client, payload, false).await
}

pub async fn stream(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    run_turn(state, client, payload, true).await
}

async fn run_turn(
    state: &Arc<AppState>,
    client: &ClientInfo,
    payload: Value,
    streaming: bool,
) -> Result<Value> {
    let request: SendPayload = super::parse(payload)?;
    if request.content.is_empty() {
        return Err(AlfredError::RpcInvalidPayload("content is required".into()));
    }
    if request.session_id.is_empty() {
        return Err(AlfredError::RpcInvalidPayload(
            "session_id is required".into(),
        ));
    }

    // Register the cancel handle for chat.abort. A re-entrant send on the
    // same session shadows the previous handle without firing it.
    let cancel = CancellationToken::new();
    state
        .active_requests
        .insert(request.session_id.clone(), cancel.clone());

    let ctx = RequestContext::with_cancel(&client.tenant_id, cancel);
    let mut msg = InboundMessage::new(
        GATEWAY_CHANNEL,
        &request.session_id,
        &client.name,
        &request.content,
    );
    msg.sender_name = client.name.clone();

    let result = if streaming {
        state.router.handle_stream(&ctx, msg).await
    } else {
        state.router.handle(&ctx, msg).await
    };

    // The registry entry is always removed on return.
    state.active_requests.remove(&request.session_id);

    let outbound = result?;
    Ok(json!({
        "session_id": outbound.session_id,
        "content": outbound.content,
        "is_error": outbound.is_error,
    }))
}

pub async fn abort(state: &Arc<AppState>, _client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: AbortPayload = super::parse(payload)?;

    let Some((_, cancel)) = state.active_requests.remove(&request.session_id) else {
        return Err(AlfredError::SessionNotFound(request.session_id));
    };
    cancel.cancel();

    state.bus.publish(Event::for_session(
        EventType::ChatAborted,
        request.session_id.clone(),
        json!({}),
    ));
    Ok(json!({ "aborted": true, "session_id": request.session_id }))
}
