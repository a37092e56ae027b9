//! The persisted event log.
//!
//! Every mutation builds the next list, writes it, and only then swaps it
//! into memory. A failed write leaves both memory and disk at the previous
//! state and returns the error.

use super::error::{StoreError, StoreResult};
use super::export;
use super::kv::{KeyValueStore, EVENTS_KEY};
use super::outbox::SyncOutbox;
use crate::config::StorageConfig;
use crate::models::{AlertResponse, DetectionEvent};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Size and age bounds applied on every insert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventLimits {
    pub max_stored_events: usize,
    pub retention: Duration,
}

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            max_stored_events: 1000,
            retention: Duration::days(30),
        }
    }
}

impl From<&StorageConfig> for EventLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_stored_events: config.max_stored_events.max(1),
            retention: Duration::days(i64::from(config.retention_days)),
        }
    }
}

pub struct EventStore {
    kv: Arc<dyn KeyValueStore>,
    events: Mutex<Vec<DetectionEvent>>,
    limits: EventLimits,
    outbox: RwLock<Option<Arc<dyn SyncOutbox>>>,
}

impl EventStore {
    /// Load the log from `kv`. An undecodable stored list is discarded.
    pub fn open(kv: Arc<dyn KeyValueStore>, limits: EventLimits) -> StoreResult<Self> {
        let events = match kv.get(EVENTS_KEY)? {
            Some(bytes) => match serde_json::from_slice::<Vec<DetectionEvent>>(&bytes) {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Stored events could not be decoded, starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(Self {
            kv,
            events: Mutex::new(events),
            limits,
            outbox: RwLock::new(None),
        })
    }

    /// Attach the peer link that local changes are forwarded to.
    pub fn set_outbox(&self, outbox: Arc<dyn SyncOutbox>) {
        *self.outbox.write() = Some(outbox);
    }

    pub fn limits(&self) -> EventLimits {
        self.limits
    }

    /// Append a newly detected event, then enforce the cap and retention.
    pub fn append(&self, event: DetectionEvent) -> StoreResult<()> {
        self.append_at(event, Utc::now())
    }

    /// [`append`](Self::append) with an explicit "now" for retention.
    pub fn append_at(&self, event: DetectionEvent, now: DateTime<Utc>) -> StoreResult<()> {
        let snapshot = {
            let mut events = self.events.lock();
            let mut next = events.clone();
            next.push(event);
            self.enforce_limits(&mut next, now);
            self.commit(&mut events, next)?
        };

        self.broadcast(&snapshot);
        Ok(())
    }

    /// Replace the event with the same id, or append it.
    pub fn upsert(&self, event: DetectionEvent) -> StoreResult<()> {
        let snapshot = {
            let mut events = self.events.lock();
            let mut next = events.clone();
            match next.iter_mut().find(|e| e.id == event.id) {
                Some(existing) => *existing = event,
                None => {
                    next.push(event);
                    self.enforce_limits(&mut next, Utc::now());
                }
            }
            self.commit(&mut events, next)?
        };

        self.broadcast(&snapshot);
        Ok(())
    }

    /// Add the peer's events whose ids are not already present.
    ///
    /// Existing ids are never overwritten and nothing is sent back to the
    /// peer. Returns the events that were added.
    pub fn merge_from_peer(
        &self,
        incoming: Vec<DetectionEvent>,
    ) -> StoreResult<Vec<DetectionEvent>> {
        self.merge_from_peer_at(incoming, Utc::now())
    }

    pub fn merge_from_peer_at(
        &self,
        incoming: Vec<DetectionEvent>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<DetectionEvent>> {
        let mut events = self.events.lock();

        let mut known: HashSet<Uuid> = events.iter().map(|e| e.id).collect();
        let added: Vec<DetectionEvent> = incoming
            .into_iter()
            .filter(|e| known.insert(e.id))
            .collect();

        if added.is_empty() {
            debug!("Peer events already known");
            return Ok(added);
        }

        let mut next = events.clone();
        next.extend(added.iter().cloned());
        self.enforce_limits(&mut next, now);

        let kept: HashSet<Uuid> = next.iter().map(|e| e.id).collect();
        self.commit(&mut events, next)?;

        let added: Vec<DetectionEvent> =
            added.into_iter().filter(|e| kept.contains(&e.id)).collect();
        debug!(count = added.len(), "Merged peer events");
        Ok(added)
    }

    /// Record the wearer's response. Response state is per device.
    pub fn respond(
        &self,
        id: Uuid,
        response: AlertResponse,
        at: DateTime<Utc>,
    ) -> StoreResult<DetectionEvent> {
        let (updated, snapshot) = {
            let mut events = self.events.lock();
            let mut next = events.clone();
            let event = next
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(StoreError::EventNotFound(id))?;
            event.respond(response, at);
            let updated = event.clone();
            (updated, self.commit(&mut events, next)?)
        };

        self.broadcast(&snapshot);
        Ok(updated)
    }

    /// Remove one event. Returns whether it existed.
    pub fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let snapshot = {
            let mut events = self.events.lock();
            if !events.iter().any(|e| e.id == id) {
                return Ok(false);
            }
            let next: Vec<DetectionEvent> = events.iter().filter(|e| e.id != id).cloned().collect();
            self.commit(&mut events, next)?
        };

        self.broadcast(&snapshot);
        Ok(true)
    }

    pub fn clear(&self) -> StoreResult<()> {
        {
            let mut events = self.events.lock();
            self.kv.remove(EVENTS_KEY)?;
            events.clear();
        }

        self.broadcast(&[]);
        Ok(())
    }

    /// All events in insertion order.
    pub fn all(&self) -> Vec<DetectionEvent> {
        self.events.lock().clone()
    }

    /// The last `n` events of [`all`](Self::all).
    pub fn recent(&self, n: usize) -> Vec<DetectionEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(n);
        events[skip..].to_vec()
    }

    /// Events with `start <= timestamp <= end`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DetectionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<DetectionEvent> {
        self.events.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn export_json(&self) -> Result<String, export::ExportError> {
        export::to_json(&self.all())
    }

    pub fn export_csv(&self) -> String {
        export::to_csv(&self.all())
    }

    /// Encoded form of the whole log, as sent to the peer.
    pub fn encoded(&self) -> StoreResult<Vec<u8>> {
        encode(&self.events.lock())
    }

    fn enforce_limits(&self, events: &mut Vec<DetectionEvent>, now: DateTime<Utc>) {
        let max = self.limits.max_stored_events;
        if events.len() > max {
            let excess = events.len() - max;
            events.drain(..excess);
        }

        if let Some(cutoff) = now.checked_sub_signed(self.limits.retention) {
            events.retain(|e| e.timestamp > cutoff);
        }
    }

    /// Persist `next` and swap it in. Returns the new list for broadcasting.
    fn commit(
        &self,
        current: &mut Vec<DetectionEvent>,
        next: Vec<DetectionEvent>,
    ) -> StoreResult<Vec<DetectionEvent>> {
        let bytes = encode(&next)?;
        self.kv.set(EVENTS_KEY, &bytes)?;
        *current = next;
        Ok(current.clone())
    }

    fn broadcast(&self, events: &[DetectionEvent]) {
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.events_changed(events);
        }
    }
}

fn encode(events: &[DetectionEvent]) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(events).map_err(|source| StoreError::Encode {
        key: EVENTS_KEY,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionType, Settings};
    use crate::store::kv::MemoryStore;
    use chrono::TimeZone;

    #[derive(Default)]
    struct RecordingOutbox {
        batches: Mutex<Vec<usize>>,
    }

    impl SyncOutbox for RecordingOutbox {
        fn settings_changed(&self, _settings: &Settings) {}

        fn events_changed(&self, events: &[DetectionEvent]) {
            self.batches.lock().push(events.len());
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()
    }

    fn event_at(ts: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent::new(ts, DetectionType::RelativeDelta, 88.0, 0.7)
    }

    fn store_with(limits: EventLimits) -> (Arc<MemoryStore>, EventStore) {
        let kv = Arc::new(MemoryStore::new());
        let store = EventStore::open(kv.clone(), limits).unwrap();
        (kv, store)
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let (_, store) = store_with(EventLimits {
            max_stored_events: 3,
            retention: Duration::days(30),
        });

        let events: Vec<_> = (0..5).map(|i| event_at(now() - Duration::minutes(10 - i))).collect();
        for event in &events {
            store.append_at(event.clone(), now()).unwrap();
        }

        let ids: Vec<Uuid> = store.all().iter().map(|e| e.id).collect();
        assert_eq!(ids, events[2..].iter().map(|e| e.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_retention_drops_old_events() {
        let (_, store) = store_with(EventLimits::default());
        store.append_at(event_at(now() - Duration::days(31)), now() - Duration::days(31)).unwrap();
        store.append_at(event_at(now() - Duration::days(2)), now()).unwrap();

        let cutoff = now() - Duration::days(30);
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert!(all.iter().all(|e| e.timestamp >= cutoff));
    }

    #[test]
    fn test_retention_beyond_calendar_keeps_everything() {
        let (_, store) = store_with(EventLimits {
            max_stored_events: 10,
            retention: Duration::days(i64::from(u32::MAX)),
        });
        let old = event_at(now() - Duration::days(3650));

        store.append(old.clone()).unwrap();
        store.upsert(event_at(Utc::now())).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(old.id).is_some());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (_, store) = store_with(EventLimits::default());
        let event = event_at(Utc::now());

        store.upsert(event.clone()).unwrap();
        let once = store.all();
        store.upsert(event).unwrap();
        assert_eq!(store.all(), once);
    }

    #[test]
    fn test_merge_never_overwrites() {
        let (_, store) = store_with(EventLimits::default());
        let mut local = event_at(Utc::now());
        store.append(local.clone()).unwrap();

        local.respond(AlertResponse::Dismissed, Utc::now());
        let fresh = event_at(Utc::now());
        let added = store.merge_from_peer(vec![local.clone(), fresh.clone()]).unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, fresh.id);
        assert_eq!(
            store.get(local.id).unwrap().alert_response,
            AlertResponse::NotResponded
        );

        // Replaying the batch changes nothing
        assert!(store.merge_from_peer(vec![local, fresh]).unwrap().is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let (kv, store) = store_with(EventLimits::default());
        store.append(event_at(Utc::now())).unwrap();

        kv.set_read_only(true);
        assert!(store.append(event_at(Utc::now())).is_err());
        assert_eq!(store.len(), 1);

        let reopened = EventStore::open(kv.clone(), EventLimits::default()).unwrap();
        assert_eq!(reopened.all(), store.all());
    }

    #[test]
    fn test_respond_and_queries() {
        let (_, store) = store_with(EventLimits::default());
        let base = Utc::now() - Duration::hours(3);
        let events: Vec<_> = (0..4).map(|i| event_at(base + Duration::hours(i))).collect();
        for event in &events {
            store.append(event.clone()).unwrap();
        }

        let updated = store
            .respond(events[1].id, AlertResponse::Acknowledged, Utc::now())
            .unwrap();
        assert!(updated.was_acknowledged());
        assert!(store.get(events[1].id).unwrap().response_time.is_some());

        assert_eq!(store.recent(2), events[2..].to_vec());
        assert_eq!(store.recent(10).len(), 4);
        assert_eq!(store.between(events[1].timestamp, events[2].timestamp).len(), 2);

        assert!(matches!(
            store.respond(Uuid::new_v4(), AlertResponse::Snoozed, Utc::now()),
            Err(StoreError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_delete_and_clear() {
        let (kv, store) = store_with(EventLimits::default());
        let event = event_at(Utc::now());
        store.append(event.clone()).unwrap();
        store.append(event_at(Utc::now())).unwrap();

        assert!(store.delete(event.id).unwrap());
        assert!(!store.delete(event.id).unwrap());
        assert_eq!(store.len(), 1);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(kv.get(EVENTS_KEY).unwrap(), None);
    }

    #[test]
    fn test_outbox_sees_local_changes_only() {
        let (_, store) = store_with(EventLimits::default());
        let outbox = Arc::new(RecordingOutbox::default());
        store.set_outbox(outbox.clone());

        store.append(event_at(Utc::now())).unwrap();
        store.merge_from_peer(vec![event_at(Utc::now())]).unwrap();
        store.append(event_at(Utc::now())).unwrap();

        assert_eq!(*outbox.batches.lock(), vec![1, 3]);
    }

    #[test]
    fn test_persisted_across_open() {
        let (kv, store) = store_with(EventLimits::default());
        let event = event_at(Utc::now());
        store.append(event.clone()).unwrap();

        let reopened = EventStore::open(kv, EventLimits::default()).unwrap();
        assert_eq!(reopened.all(), vec![event]);
    }
}
