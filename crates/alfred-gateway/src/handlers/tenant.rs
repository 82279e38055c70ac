//! `tenant.*` — tenant administration.
//!
//! Deleting a tenant cascades: its sessions are destroyed and its memory
//! wiped before the registry row goes.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use alfred_bus::{Event, EventType};
use alfred_core::Result;
use alfred_tenants::types::TenantSpec;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
struct TenantIdPayload {
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct TenantSpecPayload {
    tenant_id: String,
    name: String,
}

pub async fn list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "tenants": state.tenants.list()? }))
}

pub async fn get(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: TenantIdPayload = super::parse(payload)?;
    Ok(serde_json::to_value(state.tenants.get(&request.tenant_id)?).unwrap_or(Value::Null))
}

pub async fn create(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: TenantSpecPayload = super::parse(payload)?;
    let tenant = state
        .tenants
        .create(&request.tenant_id, TenantSpec { name: request.name })?;

    state.bus.publish(Event::new(
        EventType::TenantCreated,
        json!({ "tenant": tenant.id }),
    ));
    Ok(serde_json::to_value(tenant).unwrap_or(Value::Null))
}

pub async fn update(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: TenantSpecPayload = super::parse(payload)?;
    let tenant = state
        .tenants
        .update(&request.tenant_id, TenantSpec { name: request.name })?;

    state.bus.publish(Event::new(
        EventType::TenantUpdated,
        json!({ "tenant": tenant.id }),
    ));
    Ok(serde_json::to_value(tenant).unwrap_or(Value::Null))
}

pub async fn delete(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: TenantIdPayload = super::parse(payload)?;
    // Verify existence before the cascade touches anything.
    state.tenants.get(&request.tenant_id)?;

    let sessions_removed = state.sessions.delete_for_tenant(&request.tenant_id)?;
    let memories_removed = state.memory.delete_tenant(&request.tenant_id).await?;
    state.tenants.delete(&request.tenant_id)?;
    info!(
        tenant = %request.tenant_id,
        sessions_removed,
        memories_removed,
        "tenant deleted"
    );

    state.bus.publish(Event::new(
        EventType::TenantDeleted,
        json!({
            "tenant": request.tenant_id,
            "sessions_removed": sessions_removed,
            "memories_removed": memories_removed,
        }),
    ));
    Ok(json!({ "deleted": true, "sessions_removed": sessions_removed }))
}
