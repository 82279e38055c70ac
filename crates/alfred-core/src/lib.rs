pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use error::{AlfredError, ErrorKind, Result};
pub use types::{ClientInfo, InboundMessage, Media, MediaKind, OutboundMessage, RequestContext};
