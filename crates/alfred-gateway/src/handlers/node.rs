//! `node.*` — peer-node directory passthrough.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::Result;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
struct NodeIdPayload {
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct InvokePayload {
    node_id: String,
    method: String,
    #[serde(default)]
    payload: Value,
}

pub async fn list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "nodes": state.nodes.list().await? }))
}

pub async fn get(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: NodeIdPayload = super::parse(payload)?;
    Ok(serde_json::to_value(state.nodes.get(&request.node_id).await?).unwrap_or(Value::Null))
}

pub async fn invoke(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: InvokePayload = super::parse(payload)?;
    state
        .nodes
        .invoke(&request.node_id, &request.method, request.payload)
        .await
}

pub async fn discover(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "nodes": state.nodes.discover().await? }))
}

pub async fn token_generate(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: NodeIdPayload = super::parse(payload)?;
    let token = state.nodes.generate_token(&request.node_id).await?;
    Ok(json!({ "token": token }))
}

pub async fn token_revoke(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: NodeIdPayload = super::parse(payload)?;
    state.nodes.revoke_token(&request.node_id).await?;
    Ok(json!({ "revoked": true }))
}
