use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant not found: {id}")]
    NotFound { id: String },

    #[error("tenant already exists: {id}")]
    Duplicate { id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<TenantError> for alfred_core::AlfredError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound { id } => alfred_core::AlfredError::NotFound(id),
            TenantError::Duplicate { id } => alfred_core::AlfredError::Duplicate(id),
            TenantError::Database(e) => alfred_core::AlfredError::transport("tenants", "db", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, TenantError>;
