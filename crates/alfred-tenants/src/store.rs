use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use crate::db::row_to_tenant;
use crate::error::{Result, TenantError};
use crate::types::{Tenant, TenantSpec};

/// Thread-safe tenant registry over a single SQLite connection.
///
/// A Mutex around the connection is sufficient here — tenant administration
/// is rare and never on the message hot path.
pub struct TenantStore {
    db: Mutex<Connection>,
}

impl TenantStore {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn list(&self) -> Result<Vec<Tenant>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, created_at, updated_at FROM tenants ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_tenant)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get(&self, id: &str) -> Result<Tenant> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, created_at, updated_at FROM tenants WHERE id = ?1",
            rusqlite::params![id],
            row_to_tenant,
        ) {
            Ok(t) => Ok(t),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(TenantError::NotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(TenantError::Database(e)),
        }
    }

    pub fn create(&self, id: &str, spec: TenantSpec) -> Result<Tenant> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO tenants (id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![id, spec.name, now],
        )?;
        if inserted == 0 {
            return Err(TenantError::Duplicate { id: id.to_string() });
        }
        debug!(id, "tenant created");
        Ok(Tenant {
            id: id.to_string(),
            name: spec.name,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn update(&self, id: &str, spec: TenantSpec) -> Result<Tenant> {
        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            let changed = db.execute(
                "UPDATE tenants SET name = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, spec.name, now],
            )?;
            if changed == 0 {
                return Err(TenantError::NotFound { id: id.to_string() });
            }
        }
        self.get(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM tenants WHERE id = ?1", rusqlite::params![id])?;
        if changed == 0 {
            return Err(TenantError::NotFound { id: id.to_string() });
        }
        debug!(id, "tenant deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TenantStore {
        TenantStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_get_round_trip() {
        let store = store();
        store
            .create("acme", TenantSpec { name: "Acme Corp".into() })
            .unwrap();

        let tenant = store.get("acme").unwrap();
        assert_eq!(tenant.name, "Acme Corp");
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = store();
        store
            .create("acme", TenantSpec { name: "Acme".into() })
            .unwrap();
        let err = store
            .create("acme", TenantSpec { name: "Acme 2".into() })
            .unwrap_err();
        assert!(matches!(err, TenantError::Duplicate { .. }));
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = store();
        let err = store
            .update("ghost", TenantSpec { name: "x".into() })
            .unwrap_err();
        assert!(matches!(err, TenantError::NotFound { .. }));
    }

    #[test]
    fn delete_then_get_fails() {
        let store = store();
        store
            .create("acme", TenantSpec { name: "Acme".into() })
            .unwrap();
        store.delete("acme").unwrap();
        assert!(matches!(
            store.get("acme").unwrap_err(),
            TenantError::NotFound { .. }
        ));
    }

    #[test]
    fn list_orders_by_creation() {
        let store = store();
        store
            .create("a", TenantSpec { name: "A".into() })
            .unwrap();
        store
            .create("b", TenantSpec { name: "B".into() })
            .unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
    }
}
