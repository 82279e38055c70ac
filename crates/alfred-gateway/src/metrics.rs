//! Prometheus metrics for the gateway.
//!
//! The `metrics` facade backs `GET /metrics`; a small set of atomics
//! mirrors the counters so the status endpoint can read them back without
//! scraping.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Counter snapshot readable by `/api/v1/status`.
#[derive(Default)]
pub struct Stats {
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub llm_calls: AtomicU64,
    pub tool_calls: AtomicU64,
    pub tool_errors: AtomicU64,
}

pub struct Metrics {
    handle: PrometheusHandle,
    pub stats: Stats,
}

impl Metrics {
    /// Install the Prometheus recorder. Call once per process.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");
        info!("prometheus metrics initialized");
        Self {
            handle,
            stats: Stats::default(),
        }
    }

    /// A metrics value whose recorder is not installed globally. Used by
    /// tests that must not claim the process-wide recorder slot.
    pub fn unregistered() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
            stats: Stats::default(),
        }
    }

    /// Render the exposition text for `GET /metrics`.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn record_message_received(&self) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!("alfredai_messages_received_total").increment(1);
    }

    pub fn record_message_sent(&self) {
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        counter!("alfredai_messages_sent_total").increment(1);
    }

    pub fn record_llm_call(&self) {
        self.stats.llm_calls.fetch_add(1, Ordering::Relaxed);
        counter!("alfredai_llm_calls_total").increment(1);
    }

    pub fn record_tool_call(&self, success: bool) {
        self.stats.tool_calls.fetch_add(1, Ordering::Relaxed);
        counter!("alfredai_tool_calls_total").increment(1);
        if !success {
            self.stats.tool_errors.fetch_add(1, Ordering::Relaxed);
            counter!("alfredai_tool_errors_total").increment(1);
        }
    }

    /// Gauges refreshed at scrape time.
    pub fn update_gauges(
        &self,
        sessions_active: usize,
        sessions_total: usize,
        tools_registered: usize,
        memory_available: bool,
        uptime_seconds: u64,
    ) {
        gauge!("alfredai_sessions_active").set(sessions_active as f64);
        gauge!("alfredai_sessions_total").set(sessions_total as f64);
        gauge!("alfredai_tools_registered").set(tools_registered as f64);
        gauge!("alfredai_memory_available").set(if memory_available { 1.0 } else { 0.0 });
        gauge!("alfredai_uptime_seconds").set(uptime_seconds as f64);
        sample_runtime();
    }
}

/// Runtime gauges under the canonical names dashboards already scrape.
/// Fed from what this runtime actually exposes: Tokio task counts and the
/// kernel's view of our memory.
fn sample_runtime() {
    let rt = tokio::runtime::Handle::current().metrics();
    gauge!("go_goroutines").set(rt.num_alive_tasks() as f64);

    if let Some((vsize, rss)) = read_statm() {
        gauge!("go_memstats_sys_bytes").set(vsize as f64);
        gauge!("go_memstats_alloc_bytes").set(rss as f64);
    }
    // No collector pauses to report in this runtime.
    gauge!("go_gc_duration_seconds").set(0.0);
}

/// (virtual size, resident set) in bytes from /proc/self/statm.
fn read_statm() -> Option<(u64, u64)> {
    let raw = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = raw.split_whitespace();
    let vsize_pages: u64 = fields.next()?.parse().ok()?;
    let rss_pages: u64 = fields.next()?.parse().ok()?;
    let page = 4096u64;
    Some((vsize_pages * page, rss_pages * page))
}
