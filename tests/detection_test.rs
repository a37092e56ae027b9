//! End-to-end detection scenarios through the monitor and event store

use chrono::{DateTime, Duration, TimeZone, Utc};
use sleep_arousal_monitor::alert::LogAlertSink;
use sleep_arousal_monitor::core::{DetectionEngine, DetectionParams, LocalZone, MovementFilter};
use sleep_arousal_monitor::models::{DetectionType, Settings, TimeOfDay};
use sleep_arousal_monitor::monitor::{LocalStatus, Monitor};
use sleep_arousal_monitor::sensor::{AccelerometerReading, HeartRateSample, SensorFeed};
use sleep_arousal_monitor::stats::{create_shared_stats, SharedStats};
use sleep_arousal_monitor::store::{
    parse_csv, EventLimits, EventStore, FileStore, KeyValueStore, MemoryStore, SessionHistory,
    SettingsStore,
};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

struct Harness {
    monitor: Monitor,
    events: Arc<EventStore>,
    stats: SharedStats,
    _feed: SensorFeed,
}

fn harness_with(kv: Arc<dyn KeyValueStore>, settings: Settings) -> Harness {
    let events = Arc::new(EventStore::open(kv.clone(), EventLimits::default()).unwrap());
    let settings_store = Arc::new(SettingsStore::open(kv.clone()).unwrap());
    settings_store.update(|_| settings).unwrap();
    let sessions = Arc::new(SessionHistory::open(kv).unwrap());
    let stats = create_shared_stats();

    let monitor = Monitor::new(
        DetectionEngine::new(DetectionParams::default(), LocalZone::Named(chrono_tz::UTC)),
        MovementFilter::default(),
        events.clone(),
        settings_store,
        sessions,
        Arc::new(LogAlertSink::new("test")),
        Arc::new(LocalStatus::default()),
        stats.clone(),
    );

    let mut feed = SensorFeed::new();
    monitor.start(None, &mut feed).unwrap();

    Harness {
        monitor,
        events,
        stats,
        _feed: feed,
    }
}

fn all_day() -> Settings {
    Settings {
        sleep_window_start: TimeOfDay::new(0, 0).unwrap(),
        sleep_window_end: TimeOfDay::new(23, 59).unwrap(),
        ..Settings::default()
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()), all_day())
}

/// Recent instant so stored events survive retention.
fn t(secs: i64) -> DateTime<Utc> {
    static BASE: OnceLock<DateTime<Utc>> = OnceLock::new();
    *BASE.get_or_init(|| Utc::now() - Duration::hours(2)) + Duration::seconds(secs)
}

fn hr(secs: i64, bpm: f64) -> HeartRateSample {
    HeartRateSample::new(t(secs), bpm)
}

#[test]
fn test_absolute_threshold_scenario() {
    let h = harness();
    for i in 0..10 {
        assert!(h.monitor.process_sample(hr(i * 5, 65.0)).is_none());
    }

    let event = h.monitor.process_sample(hr(55, 95.0)).unwrap();
    assert_eq!(event.detection_type, DetectionType::AbsoluteThreshold);
    assert!((event.confidence - 0.1875).abs() < 1e-9);
    assert_eq!(event.baseline_heart_rate, Some(65.0));
    assert_eq!(event.delta_from_baseline, Some(30.0));
    assert!(!event.was_movement_suppressed);
    assert_eq!(h.events.all(), vec![event]);
}

#[test]
fn test_relative_delta_scenario() {
    let h = harness();
    for i in 0..4 {
        h.monitor.process_sample(hr(i * 10, 60.0));
    }

    // 80 is not above the medium absolute threshold
    let event = h.monitor.process_sample(hr(40, 80.0)).unwrap();
    assert_eq!(event.detection_type, DetectionType::RelativeDelta);
    assert_eq!(event.confidence, 1.0);
    assert_eq!(event.delta_from_baseline, Some(20.0));
    assert_eq!(event.time_window, Some(60.0));
}

#[test]
fn test_hrv_drop_scenario() {
    let h = harness();
    for i in 0..10 {
        h.monitor.process_sample(hr(i * 5, 60.0).with_hrv(50.0));
    }

    let event = h
        .monitor
        .process_sample(hr(50, 62.0).with_hrv(30.0))
        .unwrap();
    assert_eq!(event.detection_type, DetectionType::HrvDrop);
    assert_eq!(event.hrv_at_detection, Some(30.0));
    assert!(event.baseline_heart_rate.is_none());
}

#[test]
fn test_cooldown_suppression() {
    let h = harness();
    h.monitor.process_sample(hr(0, 65.0));

    let first = h.monitor.process_sample(hr(10, 95.0)).unwrap();
    assert!(h.monitor.process_sample(hr(70, 95.0)).is_none());
    assert_eq!(h.events.len(), 1);
    assert_eq!(h.events.all()[0].id, first.id);
    assert_eq!(h.stats.snapshot().suppressed_cooldown, 1);

    // Cooldown is measured from the first event only
    assert!(h.monitor.process_sample(hr(311, 95.0)).is_some());
}

#[test]
fn test_movement_suppression_is_not_sticky() {
    let h = harness();
    h.monitor.process_sample(hr(0, 65.0));
    h.monitor.process_motion(&AccelerometerReading::new(t(1), 0.3, 0.0, 0.0));

    assert!(h.monitor.process_sample(hr(5, 95.0)).is_none());
    assert_eq!(h.stats.snapshot().suppressed_movement, 1);

    // A suppressed cycle does not start the cooldown
    let event = h.monitor.process_sample(hr(40, 95.0)).unwrap();
    assert_eq!(event.detection_type, DetectionType::AbsoluteThreshold);
    assert!(!event.was_movement_suppressed);
}

#[test]
fn test_accelerometer_movement_window() {
    let h = harness();
    h.monitor.process_sample(hr(0, 65.0));
    h.monitor.process_motion(&AccelerometerReading::new(t(1), 0.2, 0.1, 0.0));

    assert!(h.monitor.process_sample(hr(20, 95.0)).is_none());
    assert!(h.monitor.process_sample(hr(30, 95.0)).is_none());
    assert!(h.monitor.process_sample(hr(31, 95.0)).is_some());
}

#[test]
fn test_outside_sleep_window() {
    let settings = Settings {
        sleep_window_start: TimeOfDay::new(22, 0).unwrap(),
        sleep_window_end: TimeOfDay::new(7, 0).unwrap(),
        ..Settings::default()
    };
    let h = harness_with(Arc::new(MemoryStore::new()), settings);
    let noon = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    h.monitor.process_sample(HeartRateSample::new(noon, 65.0));
    assert!(h
        .monitor
        .process_sample(HeartRateSample::new(noon + Duration::seconds(5), 120.0))
        .is_none());
    assert_eq!(h.stats.snapshot().suppressed_outside_window, 1);
}

#[test]
fn test_csv_export_round_trip() {
    let h = harness();
    h.monitor.process_sample(hr(0, 65.0));
    for i in 0..5 {
        h.monitor.process_sample(hr(10 + i * 400, 95.0));
    }
    assert_eq!(h.events.len(), 5);

    let records = parse_csv(&h.events.export_csv()).unwrap();
    let exported: HashSet<_> = h.events.all().iter().map(|e| e.id).collect();
    let parsed: HashSet<_> = records.iter().map(|r| r.id).collect();
    assert_eq!(records.len(), 5);
    assert_eq!(exported, parsed);
}

#[test]
fn test_events_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let fired = {
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let h = harness_with(kv, all_day());
        h.monitor.process_sample(hr(0, 65.0));
        h.monitor.process_sample(hr(5, 95.0)).unwrap()
    };

    let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let events = EventStore::open(kv, EventLimits::default()).unwrap();
    assert_eq!(events.all(), vec![fired]);
}
