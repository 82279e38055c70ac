//! `config.get`, `plugin.list`, `agent.list`.

use std::sync::Arc;

use serde_json::{json, Value};

use alfred_core::Result;

use crate::app::AppState;

/// Redacted runtime configuration for dashboards — never the token list or
/// channel credentials.
pub async fn config_get(state: &Arc<AppState>) -> Result<Value> {
    let channels = &state.config.channels;
    let enabled: Vec<&str> = [
        channels.telegram.as_ref().map(|_| "telegram"),
        channels.discord.as_ref().map(|_| "discord"),
        channels.slack.as_ref().map(|_| "slack"),
        channels.whatsapp.as_ref().map(|_| "whatsapp"),
        channels.matrix.as_ref().map(|_| "matrix"),
        channels.signal.as_ref().map(|_| "signal"),
        channels.irc.as_ref().map(|_| "irc"),
        channels.googlechat.as_ref().map(|_| "googlechat"),
        channels.teams.as_ref().map(|_| "teams"),
        channels.http.as_ref().map(|_| "http"),
    ]
    .into_iter()
    .flatten()
    .collect();

    Ok(json!({
        "agent": {
            "name": state.config.agent.name,
            "version": state.config.agent.version,
        },
        "gateway": {
            "bind": state.config.gateway.bind,
            "port": state.config.gateway.port,
        },
        "channels": enabled,
    }))
}

pub async fn plugin_list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "plugins": state.plugins.list() }))
}

pub async fn agent_list(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({
        "agents": [{
            "id": "main",
            "name": state.config.agent.name,
            "version": state.config.agent.version,
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;

    #[tokio::test]
    async fn config_is_redacted() {
        let (state, _dir) = test_state();
        let result = config_get(&state).await.unwrap();
        let text = result.to_string();
        assert!(result["agent"]["name"].is_string());
        assert!(!text.contains("token"));
    }

    #[tokio::test]
    async fn agent_list_reports_main() {
        let (state, _dir) = test_state();
        let result = agent_list(&state).await.unwrap();
        assert_eq!(result["agents"][0]["id"], "main");
    }
}
