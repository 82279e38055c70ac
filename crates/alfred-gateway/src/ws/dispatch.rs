//! RPC method table.
//!
//! Routes a request's method to its handler, gated on the permission the
//! method demands. Unknown methods surface the method-not-found kind in
//! the response frame's error string.

use std::sync::Arc;

use serde_json::Value;

use alfred_core::types::ClientInfo;
use alfred_core::{AlfredError, Result};
use alfred_protocol::methods as m;

use crate::app::AppState;
use crate::handlers;
use crate::rbac::{self, Permission};

pub async fn dispatch(
    state: &Arc<AppState>,
    client: &ClientInfo,
    method: &str,
    payload: Value,
) -> Result<Value> {
    let require = |perm| rbac::require(&state.bus, client, perm);

    match method {
        m::CHAT_SEND => {
            require(Permission::ToolExecute)?;
            handlers::chat::send(state, client, payload).await
        }
        m::CHAT_STREAM => {
            require(Permission::ToolExecute)?;
            handlers::chat::stream(state, client, payload).await
        }
        m::CHAT_ABORT => {
            require(Permission::ToolExecute)?;
            handlers::chat::abort(state, client, payload).await
        }

        m::SESSION_LIST => {
            require(Permission::SessionView)?;
            handlers::session::list(state, client).await
        }
        m::SESSION_GET => {
            require(Permission::SessionView)?;
            handlers::session::get(state, client, payload).await
        }
        m::SESSION_DELETE => {
            require(Permission::SessionDelete)?;
            handlers::session::delete(state, client, payload).await
        }

        m::TOOL_LIST => {
            require(Permission::SessionView)?;
            handlers::tool::list(state).await
        }
        m::TOOL_APPROVE => {
            require(Permission::ToolExecute)?;
            handlers::tool::approve(state, payload).await
        }
        m::TOOL_DENY => {
            require(Permission::ToolExecute)?;
            handlers::tool::deny(state, payload).await
        }

        m::MEMORY_QUERY => {
            require(Permission::MemoryRead)?;
            handlers::memory::query(state, client, payload).await
        }
        m::MEMORY_STORE => {
            require(Permission::MemoryWrite)?;
            handlers::memory::store(state, client, payload).await
        }
        m::MEMORY_DELETE => {
            require(Permission::MemoryDelete)?;
            handlers::memory::delete(state, client, payload).await
        }

        m::CONFIG_GET => {
            require(Permission::Dashboard)?;
            handlers::misc::config_get(state).await
        }
        m::PLUGIN_LIST => {
            require(Permission::PluginManage)?;
            handlers::misc::plugin_list(state).await
        }
        m::AGENT_LIST => {
            require(Permission::SessionView)?;
            handlers::misc::agent_list(state).await
        }

        m::NODE_LIST => {
            require(Permission::NodeManage)?;
            handlers::node::list(state).await
        }
        m::NODE_GET => {
            require(Permission::NodeManage)?;
            handlers::node::get(state, payload).await
        }
        m::NODE_INVOKE => {
            require(Permission::NodeManage)?;
            handlers::node::invoke(state, payload).await
        }
        m::NODE_DISCOVER => {
            require(Permission::NodeManage)?;
            handlers::node::discover(state).await
        }
        m::NODE_TOKEN_GENERATE => {
            require(Permission::NodeManage)?;
            handlers::node::token_generate(state, payload).await
        }
        m::NODE_TOKEN_REVOKE => {
            require(Permission::NodeManage)?;
            handlers::node::token_revoke(state, payload).await
        }

        m::CRON_LIST => {
            require(Permission::CronManage)?;
            handlers::cron::list(state, client).await
        }
        m::CRON_GET => {
            require(Permission::CronManage)?;
            handlers::cron::get(state, client, payload).await
        }
        m::CRON_CREATE => {
            require(Permission::CronManage)?;
            handlers::cron::create(state, client, payload).await
        }
        m::CRON_UPDATE => {
            require(Permission::CronManage)?;
            handlers::cron::update(state, client, payload).await
        }
        m::CRON_DELETE => {
            require(Permission::CronManage)?;
            handlers::cron::delete(state, client, payload).await
        }
        m::CRON_RUNS => {
            require(Permission::CronManage)?;
            handlers::cron::runs(state, client, payload).await
        }

        m::PROCESS_LIST => {
            require(Permission::ProcessManage)?;
            handlers::process::list(state).await
        }
        m::PROCESS_POLL => {
            require(Permission::ProcessManage)?;
            handlers::process::poll(state, payload).await
        }
        m::PROCESS_LOG => {
            require(Permission::ProcessManage)?;
            handlers::process::log(state, payload).await
        }
        m::PROCESS_WRITE => {
            require(Permission::ProcessManage)?;
            handlers::process::write(state, payload).await
        }
        m::PROCESS_KILL => {
            require(Permission::ProcessManage)?;
            handlers::process::kill(state, payload).await
        }
        m::PROCESS_CLEAR => {
            require(Permission::ProcessManage)?;
            handlers::process::clear(state).await
        }
        m::PROCESS_REMOVE => {
            require(Permission::ProcessManage)?;
            handlers::process::remove(state, payload).await
        }

        m::TENANT_LIST => {
            require(Permission::TenantManage)?;
            handlers::tenant::list(state).await
        }
        m::TENANT_GET => {
            require(Permission::TenantManage)?;
            handlers::tenant::get(state, payload).await
        }
        m::TENANT_CREATE => {
            require(Permission::TenantManage)?;
            handlers::tenant::create(state, payload).await
        }
        m::TENANT_UPDATE => {
            require(Permission::TenantManage)?;
            handlers::tenant::update(state, payload).await
        }
        m::TENANT_DELETE => {
            require(Permission::TenantManage)?;
            handlers::tenant::delete(state, payload).await
        }

        m::GDPR_EXPORT => {
            require(Permission::TenantManage)?;
            handlers::gdpr::export(state, client, payload).await
        }
        m::GDPR_DELETE => {
            require(Permission::TenantManage)?;
            handlers::gdpr::delete(state, client, payload).await
        }
        m::GDPR_ANONYMIZE => {
            require(Permission::TenantManage)?;
            handlers::gdpr::anonymize(state, client, payload).await
        }

        _ => Err(AlfredError::RpcMethodNotFound {
            method: method.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::types::DEFAULT_TENANT;
    use serde_json::json;

    fn client(roles: &[&str]) -> ClientInfo {
        ClientInfo {
            name: "test".into(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            tenant_id: DEFAULT_TENANT.into(),
        }
    }

    #[tokio::test]
    async fn unknown_method_surfaces_not_found_kind() {
        let (state, _dir) = test_state();
        let err = dispatch(&state, &client(&[]), "echo.bogus", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AlfredError::RpcMethodNotFound { .. }));
        assert!(err.to_string().contains("echo.bogus"));
    }

    #[tokio::test]
    async fn permission_gate_wraps_handlers() {
        let (state, _dir) = test_state();
        // A dashboard-only client may read config but not drive chat.
        let viewer = client(&["dashboard"]);
        assert!(dispatch(&state, &viewer, m::CONFIG_GET, json!({}))
            .await
            .is_ok());

        let err = dispatch(
            &state,
            &viewer,
            m::CHAT_SEND,
            json!({"session_id": "s1", "content": "hi"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AlfredError::Forbidden(_)));
        state.bus.close().await;
    }

    #[tokio::test]
    async fn chat_send_round_trips() {
        let (state, _dir) = test_state();
        let result = dispatch(
            &state,
            &client(&[]),
            m::CHAT_SEND,
            json!({"session_id": "s1", "content": "hi"}),
        )
        .await
        .unwrap();
        assert_eq!(result["content"], "You said: hi");
        state.bus.close().await;
    }
}
