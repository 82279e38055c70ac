use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router as AxumRouter;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use alfred_bus::EventBus;
use alfred_channels::ChannelManager;
use alfred_core::config::AlfredConfig;
use alfred_core::service::{CronService, MemoryProvider, NodeService, PluginService, ToolService};
use alfred_process::ProcessManager;
use alfred_protocol::Frame;
use alfred_router::Router;
use alfred_sessions::SessionManager;
use alfred_tenants::TenantStore;

use crate::metrics::Metrics;

/// Central shared state — passed as Arc<AppState> to every handler.
pub struct AppState {
    pub config: AlfredConfig,
    pub bus: EventBus,
    pub router: Arc<Router>,
    pub sessions: Arc<SessionManager>,
    pub tenants: Arc<TenantStore>,
    pub processes: Arc<ProcessManager>,
    pub channels: Arc<ChannelManager>,
    pub memory: Arc<dyn MemoryProvider>,
    pub tools: Arc<dyn ToolService>,
    pub cron: Arc<dyn CronService>,
    pub nodes: Arc<dyn NodeService>,
    pub plugins: Arc<dyn PluginService>,
    /// Live WS connections: conn_id → outbound frame queue.
    pub connections: DashMap<u64, mpsc::Sender<Frame>>,
    pub conn_seq: AtomicU64,
    /// In-flight chat requests: session id → cancel handle. A second send
    /// on the same session stores a new handle and shadows the old one
    /// without firing it.
    pub active_requests: DashMap<String, CancellationToken>,
    pub metrics: Metrics,
    pub started_at: Instant,
    /// Cancelled once at process shutdown; every connection observes it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::defaults::{LoopbackAgent, NoCron, NoNodes, NoPlugins, NoTools, UnavailableMemory};
    use std::sync::atomic::AtomicU64;

    /// A fully wired state over temp storage, the loopback agent, and the
    /// built-in service stand-ins.
    pub fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let sessions = Arc::new(SessionManager::new(dir.path().join("sessions")).unwrap());
        let tenants = Arc::new(TenantStore::open_in_memory().unwrap());
        let config = AlfredConfig::default();
        let processes = ProcessManager::new(config.process.clone(), bus.clone());
        let router = Arc::new(Router::new(
            Arc::clone(&sessions),
            Arc::new(LoopbackAgent),
            bus.clone(),
        ));

        let state = Arc::new(AppState {
            config,
            bus,
            router,
            sessions,
            tenants,
            processes,
            channels: Arc::new(ChannelManager::new()),
            memory: Arc::new(UnavailableMemory),
            tools: Arc::new(NoTools),
            cron: Arc::new(NoCron),
            nodes: Arc::new(NoNodes),
            plugins: Arc::new(NoPlugins),
            connections: DashMap::new(),
            conn_seq: AtomicU64::new(0),
            active_requests: DashMap::new(),
            metrics: Metrics::unregistered(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        });
        (state, dir)
    }
}

/// Assemble the gateway's HTTP surface.
pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/api/v1/status", get(crate::http::status::status_handler))
        .route("/api/v1/health", get(crate::http::status::health_handler))
        .route("/metrics", get(crate::http::status::metrics_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
