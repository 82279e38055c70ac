//! Built-in stand-ins for the external collaborators.
//!
//! These run until a real provider is wired into the assembly (and serve
//! the handler tests). Each is the smallest honest implementation: empty
//! listings, explicit not-found/unavailable errors — never silent success.

use async_trait::async_trait;
use serde_json::Value;

use alfred_core::service::{
    CronJob, CronJobSpec, CronRun, CronService, MemoryEntry, MemoryProvider, NodeInfo,
    NodeService, PluginInfo, PluginService, ToolDescriptor, ToolService,
};
use alfred_core::types::{InboundMessage, RequestContext};
use alfred_core::{AlfredError, Result};
use alfred_router::Agent;
use alfred_sessions::Session;

/// Diagnostics agent used when no LLM provider is configured: replies with
/// the message it was given so every transport can be exercised end-to-end.
pub struct LoopbackAgent;

#[async_trait]
impl Agent for LoopbackAgent {
    async fn handle_message(
        &self,
        _ctx: &RequestContext,
        _session: &mut Session,
        msg: &InboundMessage,
    ) -> Result<String> {
        Ok(format!("You said: {}", msg.content))
    }
}

/// Memory provider that reports itself unavailable.
pub struct UnavailableMemory;

#[async_trait]
impl MemoryProvider for UnavailableMemory {
    fn name(&self) -> &str {
        "none"
    }

    fn available(&self) -> bool {
        false
    }

    async fn query(&self, _tenant: &str, _query: &str, _limit: usize) -> Result<Vec<MemoryEntry>> {
        Err(AlfredError::MemoryUnavailable("no provider configured".into()))
    }

    async fn store(&self, _tenant: &str, _content: &str, _tags: &[String]) -> Result<String> {
        Err(AlfredError::MemoryUnavailable("no provider configured".into()))
    }

    async fn delete(&self, _tenant: &str, _id: &str) -> Result<()> {
        Err(AlfredError::MemoryUnavailable("no provider configured".into()))
    }

    async fn export_tenant(&self, _tenant: &str) -> Result<Vec<MemoryEntry>> {
        Ok(Vec::new())
    }

    async fn delete_tenant(&self, _tenant: &str) -> Result<u64> {
        Ok(0)
    }
}

/// Empty tool registry.
pub struct NoTools;

#[async_trait]
impl ToolService for NoTools {
    fn list(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    async fn approve(&self, call_id: &str) -> Result<()> {
        Err(AlfredError::ToolNotFound(call_id.to_string()))
    }

    async fn deny(&self, call_id: &str, _reason: Option<&str>) -> Result<()> {
        Err(AlfredError::ToolNotFound(call_id.to_string()))
    }
}

/// Cron facade with no scheduler attached.
pub struct NoCron;

#[async_trait]
impl CronService for NoCron {
    async fn list(&self, _tenant: &str) -> Result<Vec<CronJob>> {
        Ok(Vec::new())
    }

    async fn get(&self, _tenant: &str, id: &str) -> Result<CronJob> {
        Err(AlfredError::NotFound(format!("cron job {id}")))
    }

    async fn create(&self, _tenant: &str, _spec: CronJobSpec) -> Result<CronJob> {
        Err(AlfredError::NotFound("no scheduler configured".into()))
    }

    async fn update(&self, _tenant: &str, id: &str, _spec: CronJobSpec) -> Result<CronJob> {
        Err(AlfredError::NotFound(format!("cron job {id}")))
    }

    async fn delete(&self, _tenant: &str, id: &str) -> Result<()> {
        Err(AlfredError::NotFound(format!("cron job {id}")))
    }

    async fn runs(&self, _tenant: &str, _id: &str, _limit: usize) -> Result<Vec<CronRun>> {
        Ok(Vec::new())
    }
}

/// Node directory with no peers.
pub struct NoNodes;

#[async_trait]
impl NodeService for NoNodes {
    async fn list(&self) -> Result<Vec<NodeInfo>> {
        Ok(Vec::new())
    }

    async fn get(&self, id: &str) -> Result<NodeInfo> {
        Err(AlfredError::NotFound(format!("node {id}")))
    }

    async fn invoke(&self, id: &str, _method: &str, _payload: Value) -> Result<Value> {
        Err(AlfredError::NotFound(format!("node {id}")))
    }

    async fn discover(&self) -> Result<Vec<NodeInfo>> {
        Ok(Vec::new())
    }

    async fn generate_token(&self, node_id: &str) -> Result<String> {
        Err(AlfredError::NotFound(format!("node {node_id}")))
    }

    async fn revoke_token(&self, node_id: &str) -> Result<()> {
        Err(AlfredError::NotFound(format!("node {node_id}")))
    }
}

/// Empty plugin registry.
pub struct NoPlugins;

impl PluginService for NoPlugins {
    fn list(&self) -> Vec<PluginInfo> {
        Vec::new()
    }
}
