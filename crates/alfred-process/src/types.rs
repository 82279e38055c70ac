use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised process session.
///
/// `Running` transitions exactly once, to `Completed`, `Failed`, or
/// `Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    /// The child exited on its own; `exit_code` carries its code.
    Completed,
    /// The child could not be waited on (I/O failure).
    Failed,
    /// A caller killed the child before it completed; `exit_code` is None.
    Killed,
}

/// Snapshot of one process session, as returned by `process.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub agent_id: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// One page of line-oriented output, as returned by `process.log`.
///
/// The same `offset`/`limit` window is applied to both streams;
/// `total_lines` is the larger of the two line counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub stdout: String,
    pub stderr: String,
    pub total_lines: usize,
    pub offset: usize,
    pub has_more: bool,
}
