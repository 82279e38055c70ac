//! `session.*` — transcript lifecycle, scoped to the client's tenant.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_bus::{Event, EventType};
use alfred_core::types::ClientInfo;
use alfred_core::Result;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
struct SessionIdPayload {
    session_id: String,
}

pub async fn list(state: &Arc<AppState>, client: &ClientInfo) -> Result<Value> {
    let sessions = state.sessions.list_sessions_for_tenant(&client.tenant_id);
    Ok(json!({ "sessions": sessions }))
}

pub async fn get(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: SessionIdPayload = super::parse(payload)?;
    let handle = state
        .sessions
        .get_with_tenant(&request.session_id, &client.tenant_id)?;
    let session = handle.state.lock().await;
    Ok(serde_json::to_value(&*session).unwrap_or(Value::Null))
}

pub async fn delete(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: SessionIdPayload = super::parse(payload)?;
    // The tenant check runs before the delete so a foreign session id reads
    // as not-found instead of disappearing.
    state
        .sessions
        .get_with_tenant(&request.session_id, &client.tenant_id)?;
    state.sessions.delete(&request.session_id)?;

    state.bus.publish(Event::for_session(
        EventType::SessionDeleted,
        request.session_id.clone(),
        json!({ "tenant": client.tenant_id }),
    ));
    Ok(json!({ "deleted": true, "session_id": request.session_id }))
}
