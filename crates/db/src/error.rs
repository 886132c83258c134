use fieldsync_core::CoreError;

use crate::remote::row::MappingError;

/// Errors raised by either store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Local store change feed closed")]
    Closed,
}
