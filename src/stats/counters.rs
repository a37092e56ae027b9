//! Running counters for detection and sync activity.
//!
//! Nothing here identifies the wearer; the counters only say how much work
//! was done and how often something was suppressed or failed.

use crate::core::Suppression;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct MonitorStats {
    samples_processed: AtomicU64,
    motion_readings: AtomicU64,
    detections: AtomicU64,
    suppressed_empty_history: AtomicU64,
    suppressed_outside_window: AtomicU64,
    suppressed_cooldown: AtomicU64,
    suppressed_movement: AtomicU64,
    below_threshold: AtomicU64,
    alerts_failed: AtomicU64,
    messages_sent: AtomicU64,
    messages_queued: AtomicU64,
    messages_failed: AtomicU64,
    messages_received: AtomicU64,
    decode_failures: AtomicU64,
    events_merged: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            samples_processed: AtomicU64::new(0),
            motion_readings: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            suppressed_empty_history: AtomicU64::new(0),
            suppressed_outside_window: AtomicU64::new(0),
            suppressed_cooldown: AtomicU64::new(0),
            suppressed_movement: AtomicU64::new(0),
            below_threshold: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            events_merged: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Counters that are loaded from and saved to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            debug!(error = %e, "Could not load previous stats");
        }

        stats
    }

    pub fn record_sample(&self) {
        self.samples_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_motion(&self) {
        self.motion_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppression(&self, reason: Suppression) {
        let counter = match reason {
            Suppression::EmptyHistory => &self.suppressed_empty_history,
            Suppression::OutsideSleepWindow => &self.suppressed_outside_window,
            Suppression::Cooldown => &self.suppressed_cooldown,
            Suppression::Movement => &self.suppressed_movement,
            Suppression::BelowThreshold => &self.below_threshold,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failure(&self) {
        self.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_merged(&self, count: u64) {
        self.events_merged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            motion_readings: self.motion_readings.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            suppressed_empty_history: self.suppressed_empty_history.load(Ordering::Relaxed),
            suppressed_outside_window: self.suppressed_outside_window.load(Ordering::Relaxed),
            suppressed_cooldown: self.suppressed_cooldown.load(Ordering::Relaxed),
            suppressed_movement: self.suppressed_movement.load(Ordering::Relaxed),
            below_threshold: self.below_threshold.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            events_merged: self.events_merged.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Monitor Statistics:\n\
             - Samples processed: {}\n\
             - Motion readings: {}\n\
             - Detections: {}\n\
             - Suppressed: {} no history, {} outside window, {} cooldown, {} movement\n\
             - Below threshold: {}\n\
             - Alert failures: {}\n\
             \n\
             Sync:\n\
             - Messages sent: {} (queued {}, failed {})\n\
             - Messages received: {} (undecodable {})\n\
             - Peer events merged: {}\n\
             - Uptime: {} seconds",
            s.samples_processed,
            s.motion_readings,
            s.detections,
            s.suppressed_empty_history,
            s.suppressed_outside_window,
            s.suppressed_cooldown,
            s.suppressed_movement,
            s.below_threshold,
            s.alerts_failed,
            s.messages_sent,
            s.messages_queued,
            s.messages_failed,
            s.messages_received,
            s.decode_failures,
            s.events_merged,
            s.uptime_secs
        )
    }

    /// Save counters to disk, if persistence is configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.snapshot(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.restore(&persisted.counters);
            }
        }
        Ok(())
    }

    fn restore(&self, s: &StatsSnapshot) {
        let pairs = [
            (&self.samples_processed, s.samples_processed),
            (&self.motion_readings, s.motion_readings),
            (&self.detections, s.detections),
            (&self.suppressed_empty_history, s.suppressed_empty_history),
            (&self.suppressed_outside_window, s.suppressed_outside_window),
            (&self.suppressed_cooldown, s.suppressed_cooldown),
            (&self.suppressed_movement, s.suppressed_movement),
            (&self.below_threshold, s.below_threshold),
            (&self.alerts_failed, s.alerts_failed),
            (&self.messages_sent, s.messages_sent),
            (&self.messages_queued, s.messages_queued),
            (&self.messages_failed, s.messages_failed),
            (&self.messages_received, s.messages_received),
            (&self.decode_failures, s.decode_failures),
            (&self.events_merged, s.events_merged),
        ];
        for (counter, value) in pairs {
            counter.store(value, Ordering::Relaxed);
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.restore(&StatsSnapshot::zero(self.started_at));
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_processed: u64,
    pub motion_readings: u64,
    pub detections: u64,
    pub suppressed_empty_history: u64,
    pub suppressed_outside_window: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_movement: u64,
    pub below_threshold: u64,
    pub alerts_failed: u64,
    pub messages_sent: u64,
    pub messages_queued: u64,
    pub messages_failed: u64,
    pub messages_received: u64,
    pub decode_failures: u64,
    pub events_merged: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    fn zero(started_at: DateTime<Utc>) -> Self {
        Self {
            samples_processed: 0,
            motion_readings: 0,
            detections: 0,
            suppressed_empty_history: 0,
            suppressed_outside_window: 0,
            suppressed_cooldown: 0,
            suppressed_movement: 0,
            below_threshold: 0,
            alerts_failed: 0,
            messages_sent: 0,
            messages_queued: 0,
            messages_failed: 0,
            messages_received: 0,
            decode_failures: 0,
            events_merged: 0,
            started_at,
            uptime_secs: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared counters.
pub type SharedStats = Arc<MonitorStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(MonitorStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(MonitorStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = MonitorStats::new();
        stats.record_sample();
        stats.record_sample();
        stats.record_suppression(Suppression::Cooldown);
        stats.record_suppression(Suppression::Movement);
        stats.record_events_merged(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_processed, 2);
        assert_eq!(snapshot.suppressed_cooldown, 1);
        assert_eq!(snapshot.suppressed_movement, 1);
        assert_eq!(snapshot.events_merged, 3);
    }

    #[test]
    fn test_reset() {
        let stats = MonitorStats::new();
        stats.record_detection();
        stats.record_message_failed();
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.detections, 0);
        assert_eq!(snapshot.messages_failed, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = MonitorStats::with_persistence(path.clone());
        stats.record_detection();
        stats.record_decode_failure();
        stats.save().unwrap();

        let reloaded = MonitorStats::with_persistence(path);
        assert_eq!(reloaded.snapshot().detections, 1);
        assert_eq!(reloaded.snapshot().decode_failures, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = MonitorStats::new().summary();
        assert!(summary.contains("Samples processed"));
        assert!(summary.contains("Messages sent"));
    }
}
