//! `tool.*` — registry listing and the approval gate.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_bus::{Event, EventType};
use alfred_core::Result;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
struct CallPayload {
    call_id: String,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "tools": state.tools.list() }))
}

pub async fn approve(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: CallPayload = super::parse(payload)?;
    state.tools.approve(&request.call_id).await?;

    state.bus.publish(Event::new(
        EventType::ToolApproved,
        json!({ "call_id": request.call_id }),
    ));
    Ok(json!({ "approved": true }))
}

pub async fn deny(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: CallPayload = super::parse(payload)?;
    state
        .tools
        .deny(&request.call_id, request.reason.as_deref())
        .await?;

    state.bus.publish(Event::new(
        EventType::ToolDenied,
        json!({ "call_id": request.call_id, "reason": request.reason }),
    ));
    Ok(json!({ "denied": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::AlfredError;

    #[tokio::test]
    async fn empty_registry_lists_nothing() {
        let (state, _dir) = test_state();
        let result = list(&state).await.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_call_id_is_tool_not_found() {
        let (state, _dir) = test_state();
        let err = approve(&state, json!({"call_id": "c-404"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::ToolNotFound(_)));
    }
}
