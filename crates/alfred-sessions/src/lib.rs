pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::{SessionHandle, SessionManager};
pub use types::{Role, Session, SessionKey, TranscriptMessage};
