use serde::{Deserialize, Serialize};

/// One isolated tenant: sessions, memory, and events are scoped to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable identifier used as the scoping key everywhere (e.g. "acme").
    pub id: String,
    pub name: String,
    /// RFC3339 timestamps — consistent with the rest of the storage layer.
    pub created_at: String,
    pub updated_at: String,
}

/// Mutable fields accepted by create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    pub name: String,
}
