//! `memory.*` — thin adapters over the memory provider.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_bus::{Event, EventType};
use alfred_core::types::ClientInfo;
use alfred_core::Result;

use crate::app::AppState;

const DEFAULT_QUERY_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct QueryPayload {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StorePayload {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    id: String,
}

pub async fn query(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: QueryPayload = super::parse(payload)?;
    let limit = request.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let entries = state
        .memory
        .query(&client.tenant_id, &request.query, limit)
        .await?;
    Ok(json!({ "entries": entries }))
}

pub async fn store(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: StorePayload = super::parse(payload)?;
    let id = state
        .memory
        .store(&client.tenant_id, &request.content, &request.tags)
        .await?;

    state.bus.publish(Event::new(
        EventType::MemoryStored,
        json!({ "id": id, "tenant": client.tenant_id }),
    ));
    Ok(json!({ "id": id }))
}

pub async fn delete(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: DeletePayload = super::parse(payload)?;
    state.memory.delete(&client.tenant_id, &request.id).await?;

    state.bus.publish(Event::new(
        EventType::MemoryDeleted,
        json!({ "id": request.id, "tenant": client.tenant_id }),
    ));
    Ok(json!({ "deleted": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::types::DEFAULT_TENANT;
    use alfred_core::AlfredError;

    fn admin() -> ClientInfo {
        ClientInfo {
            name: "cli".into(),
            roles: vec![],
            tenant_id: DEFAULT_TENANT.into(),
        }
    }

    #[tokio::test]
    async fn unavailable_provider_surfaces_kind() {
        let (state, _dir) = test_state();
        let err = query(&state, &admin(), json!({"query": "anything"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::MemoryUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid() {
        let (state, _dir) = test_state();
        let err = delete(&state, &admin(), json!({"wrong": "shape"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::RpcInvalidPayload(_)));
    }
}
