//! Persistence.
//!
//! Three logical records live in a [`KeyValueStore`]: the settings, the
//! event log and the session history. Local changes to settings and events
//! are handed to a [`SyncOutbox`] after they are persisted.

pub mod error;
pub mod events;
pub mod export;
pub mod kv;
pub mod outbox;
pub mod sessions;
pub mod settings;

pub use error::{StoreError, StoreResult};
pub use events::{EventLimits, EventStore};
pub use export::{parse_csv, CsvRecord, ExportError, ExportFormat, CSV_HEADER};
pub use kv::{FileStore, KeyValueStore, MemoryStore, EVENTS_KEY, SESSIONS_KEY, SETTINGS_KEY};
pub use outbox::SyncOutbox;
pub use sessions::SessionHistory;
pub use settings::SettingsStore;
