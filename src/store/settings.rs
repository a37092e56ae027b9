//! The single settings record, persisted and propagated to the peer.

use super::error::{StoreError, StoreResult};
use super::kv::{KeyValueStore, SETTINGS_KEY};
use super::outbox::SyncOutbox;
use crate::models::Settings;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    current: Mutex<Settings>,
    outbox: RwLock<Option<Arc<dyn SyncOutbox>>>,
}

impl SettingsStore {
    /// Load settings from `kv`, using defaults when absent or unreadable.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> StoreResult<Self> {
        let settings = match kv.get(SETTINGS_KEY)? {
            Some(bytes) => match serde_json::from_slice::<Settings>(&bytes) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(error = %e, "Stored settings could not be decoded, using defaults");
                    Settings::default()
                }
            },
            None => Settings::default(),
        };

        Ok(Self {
            kv,
            current: Mutex::new(settings),
            outbox: RwLock::new(None),
        })
    }

    pub fn set_outbox(&self, outbox: Arc<dyn SyncOutbox>) {
        *self.outbox.write() = Some(outbox);
    }

    pub fn get(&self) -> Settings {
        self.current.lock().clone()
    }

    /// Read-modify-write. The new value is validated and persisted before
    /// it becomes current, then sent to the peer.
    pub fn update<F>(&self, change: F) -> StoreResult<Settings>
    where
        F: FnOnce(Settings) -> Settings,
    {
        let updated = {
            let mut current = self.current.lock();
            let next = change(current.clone());
            self.commit(&mut current, next)?
        };

        info!(
            preset = %updated.sensitivity_preset,
            window_start = %updated.sleep_window_start,
            window_end = %updated.sleep_window_end,
            "Settings updated"
        );

        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.settings_changed(&updated);
        }
        Ok(updated)
    }

    /// Take the peer's settings as-is, without sending them back.
    pub fn replace_from_peer(&self, settings: Settings) -> StoreResult<()> {
        let mut current = self.current.lock();
        if *current == settings {
            return Ok(());
        }
        self.commit(&mut current, settings)?;
        info!("Settings replaced from peer");
        Ok(())
    }

    /// Encoded form, as sent to the peer.
    pub fn encoded(&self) -> StoreResult<Vec<u8>> {
        encode(&self.current.lock())
    }

    fn commit(&self, current: &mut Settings, next: Settings) -> StoreResult<Settings> {
        next.validate()?;
        let bytes = encode(&next)?;
        self.kv.set(SETTINGS_KEY, &bytes)?;
        *current = next;
        Ok(current.clone())
    }
}

fn encode(settings: &Settings) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(settings).map_err(|source| StoreError::Encode {
        key: SETTINGS_KEY,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionEvent, SensitivityPreset, TimeOfDay};
    use crate::store::kv::MemoryStore;

    #[derive(Default)]
    struct CountingOutbox {
        settings: Mutex<u32>,
    }

    impl SyncOutbox for CountingOutbox {
        fn settings_changed(&self, _settings: &Settings) {
            *self.settings.lock() += 1;
        }

        fn events_changed(&self, _events: &[DetectionEvent]) {}
    }

    #[test]
    fn test_update_persists_and_broadcasts() {
        let kv = Arc::new(MemoryStore::new());
        let store = SettingsStore::open(kv.clone()).unwrap();
        let outbox = Arc::new(CountingOutbox::default());
        store.set_outbox(outbox.clone());

        store
            .update(|s| Settings {
                sensitivity_preset: SensitivityPreset::High,
                ..s
            })
            .unwrap();

        assert_eq!(store.get().effective_absolute_threshold(), 70.0);
        assert_eq!(*outbox.settings.lock(), 1);

        let reopened = SettingsStore::open(kv).unwrap();
        assert_eq!(reopened.get().sensitivity_preset, SensitivityPreset::High);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let store = SettingsStore::open(Arc::new(MemoryStore::new())).unwrap();
        let result = store.update(|s| Settings {
            sensitivity_preset: SensitivityPreset::Custom,
            custom_absolute_threshold: Some(-5.0),
            ..s
        });

        assert!(matches!(result, Err(StoreError::Settings(_))));
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_peer_replace_does_not_echo() {
        let store = SettingsStore::open(Arc::new(MemoryStore::new())).unwrap();
        let outbox = Arc::new(CountingOutbox::default());
        store.set_outbox(outbox.clone());

        let peer = Settings {
            sleep_window_start: TimeOfDay::new(23, 15).unwrap(),
            ..Settings::default()
        };
        store.replace_from_peer(peer.clone()).unwrap();

        assert_eq!(store.get(), peer);
        assert_eq!(*outbox.settings.lock(), 0);
    }

    #[test]
    fn test_corrupt_settings_fall_back() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SETTINGS_KEY, b"{not json").unwrap();
        let store = SettingsStore::open(kv).unwrap();
        assert_eq!(store.get(), Settings::default());
    }
}
