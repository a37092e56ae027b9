//! Storage error types.

use crate::models::SettingsError;
use thiserror::Error;
use uuid::Uuid;

/// Storage error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode '{key}': {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode '{key}': {source}")]
    Decode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Event {0} not found")]
    EventNotFound(Uuid),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type StoreResult<T> = Result<T, StoreError>;
