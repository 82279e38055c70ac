use rusqlite::{Connection, Result};

use crate::types::Tenant;

/// Map a SELECT row (column order from the queries in store.rs) to a Tenant.
/// Centralised here so every query in this crate stays consistent.
pub(crate) fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Initialise the tenants table. CREATE IF NOT EXISTS makes this safe to
/// call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )
}
