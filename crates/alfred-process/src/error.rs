use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process session not found: {0}")]
    NotFound(String),

    #[error("process not running: {0}")]
    NotRunning(String),

    #[error("stdin closed for process: {0}")]
    StdinClosed(String),

    #[error("process limit reached for agent {agent_id}: max {limit}")]
    LimitReached { agent_id: String, limit: usize },

    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<ProcessError> for alfred_core::AlfredError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(id) => alfred_core::AlfredError::NotFound(id),
            ProcessError::NotRunning(id) => alfred_core::AlfredError::ProcessNotRunning(id),
            ProcessError::StdinClosed(id) => alfred_core::AlfredError::ProcessNotRunning(id),
            ProcessError::LimitReached { agent_id, limit } => {
                alfred_core::AlfredError::LimitReached(format!(
                    "agent {agent_id} already has {limit} running processes"
                ))
            }
            ProcessError::Spawn(e) => alfred_core::AlfredError::transport("process", "spawn", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
