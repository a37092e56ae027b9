//! Hook through which stores hand local changes to the peer link.

use crate::models::{DetectionEvent, Settings};
use chrono::{DateTime, Utc};

/// Receives state that should be propagated to the peer.
///
/// Calls happen after the change is persisted and must not block.
pub trait SyncOutbox: Send + Sync {
    fn settings_changed(&self, settings: &Settings);

    /// `events` is the full current list.
    fn events_changed(&self, events: &[DetectionEvent]);

    fn heart_rate_observed(&self, _bpm: f64, _at: DateTime<Utc>) {}

    fn monitoring_changed(&self, _is_monitoring: bool) {}
}
