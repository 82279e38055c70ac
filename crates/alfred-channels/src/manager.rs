use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use alfred_core::types::OutboundMessage;

use crate::channel::{Channel, ChannelStatus, InboundHandler};
use crate::error::{ChannelError, Result};

/// Holds every registered transport adapter and drives them as a group.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register an adapter. A channel with the same name is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.channels.insert(name, channel);
    }

    /// Start every registered channel with the shared dispatch handler.
    ///
    /// Start failures are logged and do not abort the remaining channels —
    /// one misconfigured transport must not take the runtime down.
    pub async fn start_all(&self, handler: InboundHandler) {
        for (name, channel) in &self.channels {
            info!(channel = %name, "starting channel");
            if let Err(e) = channel.start(Arc::clone(&handler)).await {
                error!(channel = %name, error = %e, "failed to start channel");
            }
        }
    }

    /// Stop every registered channel. Errors are logged, not propagated.
    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            info!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "error while stopping channel");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Route an outbound message to the named channel.
    pub async fn send_to(&self, channel_name: &str, msg: &OutboundMessage) -> Result<()> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| ChannelError::NotConnected(channel_name.to_string()))?;
        channel.send(msg).await
    }

    /// Status of every registered channel, sorted by name for stable output.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(name, ch)| (name.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
