//! Error types for schema evolution

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Boxed cause carried by migration failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Schema engine errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Structural problem in submitted fields or indexes
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Operation not allowed in the record's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A physical primitive failed; the whole migration unit was rolled back
    #[error("Migration {unit_id} for entity '{entity}' failed at {primitive}: {source}")]
    Migration {
        entity: String,
        unit_id: String,
        primitive: String,
        #[source]
        source: BoxError,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSchema(message.into())
    }

    /// Whether this error came out of a failed migration unit
    pub fn is_migration(&self) -> bool {
        matches!(self, SchemaError::Migration { .. })
    }
}
