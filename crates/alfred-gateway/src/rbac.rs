//! Permission gate wrapped around every RPC handler.

use serde_json::json;
use tracing::warn;

use alfred_bus::{Event, EventBus, EventType};
use alfred_core::types::ClientInfo;
use alfred_core::AlfredError;

/// Every capability the RPC surface can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ToolExecute,
    SessionView,
    SessionDelete,
    MemoryRead,
    MemoryWrite,
    MemoryDelete,
    Dashboard,
    PluginManage,
    NodeManage,
    CronManage,
    ProcessManage,
    TenantManage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ToolExecute => "tool_execute",
            Permission::SessionView => "session_view",
            Permission::SessionDelete => "session_delete",
            Permission::MemoryRead => "memory_read",
            Permission::MemoryWrite => "memory_write",
            Permission::MemoryDelete => "memory_delete",
            Permission::Dashboard => "dashboard",
            Permission::PluginManage => "plugin_manage",
            Permission::NodeManage => "node_manage",
            Permission::CronManage => "cron_manage",
            Permission::ProcessManage => "process_manage",
            Permission::TenantManage => "tenant_manage",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role → permission evaluation.
///
/// The `admin` role grants everything; any other role grants exactly the
/// permission carrying its name. An empty role set never reaches this
/// check — it is treated as implicit admin by [`require`].
pub struct Authorizer;

impl Authorizer {
    pub fn authorize(roles: &[String], perm: Permission) -> bool {
        roles
            .iter()
            .any(|role| role == "admin" || role == perm.as_str())
    }
}

/// Gate an RPC call on `perm`.
///
/// Denials publish an `access_denied` audit event and surface as
/// `Forbidden`; they are never silent.
pub fn require(bus: &EventBus, client: &ClientInfo, perm: Permission) -> Result<(), AlfredError> {
    if client.is_implicit_admin() {
        return Ok(());
    }
    if Authorizer::authorize(&client.roles, perm) {
        return Ok(());
    }

    warn!(client = %client.name, perm = %perm, "access denied");
    bus.publish(Event::new(
        EventType::AccessDenied,
        json!({
            "client": client.name,
            "tenant": client.tenant_id,
            "permission": perm.as_str(),
        }),
    ));
    Err(AlfredError::Forbidden(format!(
        "permission {perm} required"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::DEFAULT_TENANT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn client(roles: &[&str]) -> ClientInfo {
        ClientInfo {
            name: "test".into(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            tenant_id: DEFAULT_TENANT.into(),
        }
    }

    #[tokio::test]
    async fn empty_roles_are_implicit_admin() {
        let bus = EventBus::new();
        assert!(require(&bus, &client(&[]), Permission::TenantManage).is_ok());
        bus.close().await;
    }

    #[tokio::test]
    async fn named_role_grants_matching_permission_only() {
        let bus = EventBus::new();
        let viewer = client(&["session_view"]);
        assert!(require(&bus, &viewer, Permission::SessionView).is_ok());
        assert!(require(&bus, &viewer, Permission::SessionDelete).is_err());
        bus.close().await;
    }

    #[tokio::test]
    async fn admin_role_grants_everything() {
        let bus = EventBus::new();
        let admin = client(&["admin"]);
        assert!(require(&bus, &admin, Permission::TenantManage).is_ok());
        assert!(require(&bus, &admin, Permission::MemoryDelete).is_ok());
        bus.close().await;
    }

    #[tokio::test]
    async fn denial_publishes_audit_event() {
        let bus = EventBus::new();
        let denials = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&denials);
        bus.subscribe(EventType::AccessDenied, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        let err = require(&bus, &client(&["dashboard"]), Permission::ToolExecute).unwrap_err();
        assert!(matches!(err, AlfredError::Forbidden(_)));

        bus.close().await;
        assert_eq!(denials.load(Ordering::SeqCst), 1);
    }
}
