//! Open monitoring session and the history of closed ones.

use super::error::{StoreError, StoreResult};
use super::kv::{KeyValueStore, SESSIONS_KEY};
use crate::models::{DetectionEvent, MealTiming, NightSummary, Session};
use crate::sensor::HeartRateSample;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct SessionState {
    current: Option<Session>,
    history: Vec<Session>,
}

pub struct SessionHistory {
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<SessionState>,
}

impl SessionHistory {
    pub fn open(kv: Arc<dyn KeyValueStore>) -> StoreResult<Self> {
        let history = match kv.get(SESSIONS_KEY)? {
            Some(bytes) => match serde_json::from_slice::<Vec<Session>>(&bytes) {
                Ok(history) => history,
                Err(e) => {
                    warn!(error = %e, "Stored sessions could not be decoded, starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(Self {
            kv,
            state: Mutex::new(SessionState {
                current: None,
                history,
            }),
        })
    }

    /// Open a new session. A session that is still open is closed first.
    pub fn start(&self, at: DateTime<Utc>, meal_timing: Option<MealTiming>) -> StoreResult<Uuid> {
        let mut state = self.state.lock();
        if state.current.is_some() {
            warn!("Session still open, closing it before starting a new one");
            self.close(&mut state, at)?;
        }

        let session = Session::open(at, meal_timing);
        let id = session.id;
        state.current = Some(session);
        info!(session_id = %id, "Session started");
        Ok(id)
    }

    pub fn add_sample(&self, sample: HeartRateSample) {
        if let Some(session) = self.state.lock().current.as_mut() {
            session.samples.push(sample);
        }
    }

    pub fn add_event(&self, event: DetectionEvent) {
        if let Some(session) = self.state.lock().current.as_mut() {
            session.detected_events.push(event);
        }
    }

    /// Close and persist the open session. `None` when nothing was open.
    ///
    /// If the write fails the session stays open.
    pub fn end(&self, at: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let mut state = self.state.lock();
        self.close(&mut state, at)
    }

    /// Drop an open session without recording it.
    pub fn discard(&self) {
        self.state.lock().current = None;
    }

    pub fn current(&self) -> Option<Session> {
        self.state.lock().current.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Closed sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().history.clone()
    }

    pub fn summaries(&self) -> Vec<NightSummary> {
        self.state
            .lock()
            .history
            .iter()
            .filter_map(Session::summary)
            .collect()
    }

    pub fn clear(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        self.kv.remove(SESSIONS_KEY)?;
        state.history.clear();
        Ok(())
    }

    fn close(&self, state: &mut SessionState, at: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let Some(mut session) = state.current.clone() else {
            return Ok(None);
        };
        session.end_time = Some(at);

        let mut next = state.history.clone();
        next.push(session.clone());
        let bytes = serde_json::to_vec(&next).map_err(|source| StoreError::Encode {
            key: SESSIONS_KEY,
            source,
        })?;
        self.kv.set(SESSIONS_KEY, &bytes)?;

        state.history = next;
        state.current = None;
        info!(
            session_id = %session.id,
            samples = session.samples.len(),
            events = session.detected_events.len(),
            "Session ended"
        );
        Ok(Some(session))
    }
}
