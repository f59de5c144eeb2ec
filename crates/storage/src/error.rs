use fieldsync_core::EntityType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("entity {entity_id} is a {found}, expected {expected}")]
    TypeMismatch {
        entity_id: String,
        expected: EntityType,
        found: EntityType,
    },

    #[error("core error: {0}")]
    Core(#[from] fieldsync_core::CoreError),
}
