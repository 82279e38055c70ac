pub mod error;
pub mod manager;
pub mod ring;
pub mod types;

pub use error::ProcessError;
pub use manager::ProcessManager;
pub use ring::RingBuffer;
pub use types::{LogPage, ProcessInfo, ProcessStatus};
