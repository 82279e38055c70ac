//! `gdpr.*` — data-subject operations over a tenant's footprint.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use alfred_bus::{Event, EventType};
use alfred_core::types::ClientInfo;
use alfred_core::Result;

use crate::app::AppState;

const REDACTED: &str = "[redacted]";

#[derive(Debug, Deserialize)]
struct GdprPayload {
    #[serde(default)]
    tenant_id: Option<String>,
}

fn target_tenant(client: &ClientInfo, payload: Value) -> Result<String> {
    let request: GdprPayload = super::parse(payload)?;
    Ok(request.tenant_id.unwrap_or_else(|| client.tenant_id.clone()))
}

/// Export every session transcript and memory entry the tenant owns.
pub async fn export(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let tenant = target_tenant(client, payload)?;

    let mut sessions = Vec::new();
    for summary in state.sessions.list_sessions_for_tenant(&tenant) {
        if let Ok(handle) = state.sessions.get(&summary.id) {
            let session = handle.state.lock().await;
            sessions.push(serde_json::to_value(&*session).unwrap_or(Value::Null));
        }
    }
    let memory = state.memory.export_tenant(&tenant).await?;

    state.bus.publish(Event::new(
        EventType::GdprExport,
        json!({ "tenant": tenant, "sessions": sessions.len(), "memories": memory.len() }),
    ));
    Ok(json!({
        "tenant": tenant,
        "sessions": sessions,
        "memory": memory,
    }))
}

/// Erase the tenant's sessions and memory. The tenant record itself stays.
pub async fn delete(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let tenant = target_tenant(client, payload)?;

    let sessions_removed = state.sessions.delete_for_tenant(&tenant)?;
    let memories_removed = state.memory.delete_tenant(&tenant).await?;
    info!(tenant = %tenant, sessions_removed, memories_removed, "gdpr erasure completed");

    state.bus.publish(Event::new(
        EventType::GdprDelete,
        json!({ "tenant": tenant, "sessions_removed": sessions_removed }),
    ));
    Ok(json!({
        "tenant": tenant,
        "sessions_removed": sessions_removed,
        "memories_removed": memories_removed,
    }))
}

/// Keep the conversation skeletons but strip their content: every
/// transcript message is replaced with a redaction marker, and the
/// tenant's memory is wiped.
pub async fn anonymize(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let tenant = target_tenant(client, payload)?;

    let mut redacted_sessions = 0u64;
    for summary in state.sessions.list_sessions_for_tenant(&tenant) {
        let Ok(handle) = state.sessions.get(&summary.id) else {
            continue;
        };
        let mut session = handle.state.lock().await;
        for message in &mut session.messages {
            message.content = REDACTED.to_string();
        }
        state.sessions.persist(&session)?;
        redacted_sessions += 1;
    }
    let memories_removed = state.memory.delete_tenant(&tenant).await?;
    info!(tenant = %tenant, redacted_sessions, "gdpr anonymization completed");

    state.bus.publish(Event::new(
        EventType::GdprDelete,
        json!({ "tenant": tenant, "anonymized": true }),
    ));
    Ok(json!({
        "tenant": tenant,
        "sessions_anonymized": redacted_sessions,
        "memories_removed": memories_removed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::types::{InboundMessage, RequestContext, DEFAULT_TENANT};

    fn admin() -> ClientInfo {
        ClientInfo {
            name: "dpo".into(),
            roles: vec![],
            tenant_id: DEFAULT_TENANT.into(),
        }
    }

    async fn seed(state: &Arc<AppState>, tenant: &str) {
        let ctx = RequestContext::new(tenant);
        state
            .router
            .handle(&ctx, InboundMessage::new("gateway", "s1", "u", "secret words"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn export_contains_transcripts() {
        let (state, _dir) = test_state();
        seed(&state, "acme").await;

        let result = export(&state, &admin(), json!({"tenant_id": "acme"}))
            .await
            .unwrap();
        let sessions = result["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["content"].as_str().unwrap().contains("secret words")));
        state.bus.close().await;
    }

    #[tokio::test]
    async fn delete_erases_sessions() {
        let (state, _dir) = test_state();
        seed(&state, "acme").await;

        let result = delete(&state, &admin(), json!({"tenant_id": "acme"}))
            .await
            .unwrap();
        assert_eq!(result["sessions_removed"], 1);
        assert!(state.sessions.list_sessions_for_tenant("acme").is_empty());
        state.bus.close().await;
    }

    #[tokio::test]
    async fn anonymize_redacts_but_keeps_sessions() {
        let (state, _dir) = test_state();
        seed(&state, "acme").await;

        anonymize(&state, &admin(), json!({"tenant_id": "acme"}))
            .await
            .unwrap();

        let summaries = state.sessions.list_sessions_for_tenant("acme");
        assert_eq!(summaries.len(), 1);
        let handle = state.sessions.get(&summaries[0].id).unwrap();
        let session = handle.state.lock().await;
        assert!(session.messages.iter().all(|m| m.content == REDACTED));
        state.bus.close().await;
    }

    #[tokio::test]
    async fn tenant_defaults_to_the_client() {
        let (state, _dir) = test_state();
        seed(&state, DEFAULT_TENANT).await;

        let result = export(&state, &admin(), json!({})).await.unwrap();
        assert_eq!(result["tenant"], DEFAULT_TENANT);
        assert_eq!(result["sessions"].as_array().unwrap().len(), 1);
        state.bus.close().await;
    }
}
