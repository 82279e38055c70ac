//! RPC → usecase adapters, one module per method group.

pub mod chat;
pub mod cron;
pub mod gdpr;
pub mod memory;
pub mod misc;
pub mod node;
pub mod process;
pub mod session;
pub mod tenant;
pub mod tool;

use serde::de::DeserializeOwned;
use serde_json::Value;

use alfred_core::{AlfredError, Result};

/// Decode a request payload; missing or mistyped fields surface as the
/// invalid-payload kind.
pub(crate) fn parse<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| AlfredError::RpcInvalidPayload(e.to_string()))
}
