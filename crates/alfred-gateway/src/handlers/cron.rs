//! `cron.*` — scheduler passthrough, tenant-scoped.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use alfred_bus::{Event, EventType};
use alfred_core::service::CronJobSpec;
use alfred_core::types::ClientInfo;
use alfred_core::Result;

use crate::app::AppState;

const DEFAULT_RUNS_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct JobIdPayload {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    job_id: String,
    #[serde(flatten)]
    spec: CronJobSpec,
}

#[derive(Debug, Deserialize)]
struct RunsPayload {
    job_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn list(state: &Arc<AppState>, client: &ClientInfo) -> Result<Value> {
    Ok(json!({ "jobs": state.cron.list(&client.tenant_id).await? }))
}

pub async fn get(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: JobIdPayload = super::parse(payload)?;
    let job = state.cron.get(&client.tenant_id, &request.job_id).await?;
    Ok(serde_json::to_value(job).unwrap_or(Value::Null))
}

pub async fn create(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let spec: CronJobSpec = super::parse(payload)?;
    let job = state.cron.create(&client.tenant_id, spec).await?;

    state.bus.publish(Event::new(
        EventType::CronJobCreated,
        json!({ "job_id": job.id, "tenant": client.tenant_id }),
    ));
    Ok(serde_json::to_value(job).unwrap_or(Value::Null))
}

pub async fn update(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: UpdatePayload = super::parse(payload)?;
    let job = state
        .cron
        .update(&client.tenant_id, &request.job_id, request.spec)
        .await?;

    state.bus.publish(Event::new(
        EventType::CronJobUpdated,
        json!({ "job_id": job.id, "tenant": client.tenant_id }),
    ));
    Ok(serde_json::to_value(job).unwrap_or(Value::Null))
}

pub async fn delete(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: JobIdPayload = super::parse(payload)?;
    state
        .cron
        .delete(&client.tenant_id, &request.job_id)
        .await?;

    state.bus.publish(Event::new(
        EventType::CronJobDeleted,
        json!({ "job_id": request.job_id, "tenant": client.tenant_id }),
    ));
    Ok(json!({ "deleted": true }))
}

pub async fn runs(state: &Arc<AppState>, client: &ClientInfo, payload: Value) -> Result<Value> {
    let request: RunsPayload = super::parse(payload)?;
    let limit = request.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let runs = state
        .cron
        .runs(&client.tenant_id, &request.job_id, limit)
        .await?;
    Ok(json!({ "runs": runs }))
}
