//! Narrow trait seams for the external collaborators the gateway drives.
//!
//! The memory store, tool executor, cron scheduler, node directory, and
//! plugin registry are separate systems; the RPC handlers only ever see
//! these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One retrieved memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

/// The hybrid retriever behind `memory.*` and the GDPR surface.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Provider tag reported on the status surface (e.g. "sqlite-fts5").
    fn name(&self) -> &str;

    /// Whether the backing store is currently reachable.
    fn available(&self) -> bool;

    async fn query(&self, tenant_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryEntry>>;

    async fn store(&self, tenant_id: &str, content: &str, tags: &[String]) -> Result<String>;

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<()>;

    /// Export every entry owned by a tenant (GDPR export).
    async fn export_tenant(&self, tenant_id: &str) -> Result<Vec<MemoryEntry>>;

    /// Remove every entry owned by a tenant, returning the count removed.
    async fn delete_tenant(&self, tenant_id: &str) -> Result<u64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Tool registry + approval gate consumed by `tool.*`.
#[async_trait]
pub trait ToolService: Send + Sync {
    fn list(&self) -> Vec<ToolDescriptor>;

    async fn approve(&self, call_id: &str) -> Result<()>;

    async fn deny(&self, call_id: &str, reason: Option<&str>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub payload: Value,
    pub enabled: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobSpec {
    pub name: String,
    pub schedule: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "crate::service::default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRun {
    pub job_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub output: String,
}

/// Scheduler consumed by `cron.*` — scheduling semantics live elsewhere.
#[async_trait]
pub trait CronService: Send + Sync {
    async fn list(&self, tenant_id: &str) -> Result<Vec<CronJob>>;
    async fn get(&self, tenant_id: &str, id: &str) -> Result<CronJob>;
    async fn create(&self, tenant_id: &str, spec: CronJobSpec) -> Result<CronJob>;
    async fn update(&self, tenant_id: &str, id: &str, spec: CronJobSpec) -> Result<CronJob>;
    async fn delete(&self, tenant_id: &str, id: &str) -> Result<()>;
    async fn runs(&self, tenant_id: &str, id: &str, limit: usize) -> Result<Vec<CronRun>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub online: bool,
}

/// Peer-node directory consumed by `node.*`.
#[async_trait]
pub trait NodeService: Send + Sync {
    async fn list(&self) -> Result<Vec<NodeInfo>>;
    async fn get(&self, id: &str) -> Result<NodeInfo>;
    async fn invoke(&self, id: &str, method: &str, payload: Value) -> Result<Value>;
    async fn discover(&self) -> Result<Vec<NodeInfo>>;
    async fn generate_token(&self, node_id: &str) -> Result<String>;
    async fn revoke_token(&self, node_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub enabled: bool,
}

/// Plugin registry consumed by `plugin.list`.
pub trait PluginService: Send + Sync {
    fn list(&self) -> Vec<PluginInfo>;
}

pub(crate) fn default_true() -> bool {
    true
}
