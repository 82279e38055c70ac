//! `process.*` — supervision of background child processes.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::Result;

use crate::app::AppState;

const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct ProcessIdPayload {
    process_id: String,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    process_id: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WritePayload {
    process_id: String,
    input: String,
}

pub async fn list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "processes": state.processes.list() }))
}

pub async fn poll(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: ProcessIdPayload = super::parse(payload)?;
    let output = state.processes.poll(&request.process_id)?;
    Ok(json!({ "output": output }))
}

pub async fn log(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: LogPayload = super::parse(payload)?;
    let page = state.processes.log(
        &request.process_id,
        request.offset,
        request.limit.unwrap_or(DEFAULT_LOG_LIMIT),
    )?;
    Ok(serde_json::to_value(page).unwrap_or(Value::Null))
}

pub async fn write(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: WritePayload = super::parse(payload)?;
    state
        .processes
        .write(&request.process_id, &request.input)
        .await?;
    Ok(json!({ "written": true }))
}

pub async fn kill(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: ProcessIdPayload = super::parse(payload)?;
    state.processes.kill(&request.process_id)?;
    Ok(json!({ "killed": true }))
}

pub async fn clear(state: &Arc<AppState>) -> Result<Value> {
    let removed = state.processes.clear();
    Ok(json!({ "removed": removed }))
}

pub async fn remove(state: &Arc<AppState>, payload: Value) -> Result<Value> {
    let request: ProcessIdPayload = super::parse(payload)?;
    state.processes.remove(&request.process_id)?;
    Ok(json!({ "removed": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::AlfredError;

    #[tokio::test]
    async fn full_lifecycle_over_rpc() {
        let (state, _dir) = test_state();

        let id = state
            .processes
            .start("sh", &["-c".into(), "echo rpc-out".into()], None, "main")
            .unwrap();
        state.processes.get(&id).unwrap().wait_done().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let listed = list(&state).await.unwrap();
        assert_eq!(listed["processes"].as_array().unwrap().len(), 1);

        let polled = poll(&state, json!({"process_id": id})).await.unwrap();
        assert!(polled["output"].as_str().unwrap().contains("rpc-out"));

        let cleared = clear(&state).await.unwrap();
        assert_eq!(cleared["removed"], 1);
        state.bus.close().await;
    }

    #[tokio::test]
    async fn unknown_process_is_not_found() {
        let (state, _dir) = test_state();
        let err = poll(&state, json!({"process_id": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::NotFound(_)));
    }

    #[tokio::test]
    async fn write_to_finished_process_fails() {
        let (state, _dir) = test_state();
        let id = state
            .processes
            .start("sh", &["-c".into(), "true".into()], None, "main")
            .unwrap();
        state.processes.get(&id).unwrap().wait_done().await;

        let err = write(&state, json!({"process_id": id, "input": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::ProcessNotRunning(_)));
        state.bus.close().await;
    }
}
