//! Monitoring session lifecycle and the sample evaluation path.
//!
//! Samples are evaluated strictly in arrival order: the engine and the
//! sample buffer sit behind one mutex, so two cycles never overlap. The
//! movement ring has its own lock and is fed independently.

use crate::alert::{AlertOptions, AlertSink};
use crate::core::{DetectionEngine, Evaluation, HeartRateStatistics, MovementFilter, SampleBuffer};
use crate::models::{DetectionEvent, MealTiming, Session};
use crate::sensor::{
    AccelerometerReading, HeartRateSample, MovementSample, SensorError, SensorEvent, SensorSource,
};
use crate::stats::SharedStats;
use crate::store::{EventStore, SessionHistory, SettingsStore, StoreError, SyncOutbox};
use crate::sync::HeartRatePayload;
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Poll interval of the feed loop while waiting for samples.
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitoring is already running")]
    AlreadyRunning,

    #[error("Monitoring is not running")]
    NotRunning,

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// State this device reports to its peer.
#[derive(Debug, Default)]
pub struct LocalStatus {
    monitoring: AtomicBool,
    latest: Mutex<Option<HeartRatePayload>>,
}

impl LocalStatus {
    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn set_monitoring(&self, monitoring: bool) {
        self.monitoring.store(monitoring, Ordering::SeqCst);
    }

    pub fn latest_heart_rate(&self) -> Option<HeartRatePayload> {
        *self.latest.lock()
    }

    pub fn record_heart_rate(&self, payload: HeartRatePayload) {
        *self.latest.lock() = Some(payload);
    }
}

struct Evaluator {
    engine: DetectionEngine,
    buffer: SampleBuffer,
}

pub struct Monitor {
    evaluator: Mutex<Evaluator>,
    movement: Mutex<MovementFilter>,
    events: Arc<EventStore>,
    settings: Arc<SettingsStore>,
    sessions: Arc<SessionHistory>,
    alerts: Arc<dyn AlertSink>,
    local: Arc<LocalStatus>,
    stats: SharedStats,
    outbox: RwLock<Option<Arc<dyn SyncOutbox>>>,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: DetectionEngine,
        movement: MovementFilter,
        events: Arc<EventStore>,
        settings: Arc<SettingsStore>,
        sessions: Arc<SessionHistory>,
        alerts: Arc<dyn AlertSink>,
        local: Arc<LocalStatus>,
        stats: SharedStats,
    ) -> Self {
        Self {
            evaluator: Mutex::new(Evaluator {
                engine,
                buffer: SampleBuffer::new(),
            }),
            movement: Mutex::new(movement),
            events,
            settings,
            sessions,
            alerts,
            local,
            stats,
            outbox: RwLock::new(None),
        }
    }

    /// Route heart-rate and monitoring announcements to the peer.
    pub fn set_outbox(&self, outbox: Arc<dyn SyncOutbox>) {
        *self.outbox.write() = Some(outbox);
    }

    pub fn is_monitoring(&self) -> bool {
        self.local.is_monitoring()
    }

    pub fn local_status(&self) -> Arc<LocalStatus> {
        self.local.clone()
    }

    /// Start the sensor and open a session.
    ///
    /// A sensor or storage failure is returned as-is and leaves no open
    /// session behind.
    pub fn start(
        &self,
        meal_timing: Option<MealTiming>,
        sensor: &mut dyn SensorSource,
    ) -> Result<Uuid, MonitorError> {
        if self.is_monitoring() {
            return Err(MonitorError::AlreadyRunning);
        }

        sensor.start()?;

        let session_id = match self.sessions.start(Utc::now(), meal_timing) {
            Ok(id) => id,
            Err(e) => {
                sensor.stop();
                return Err(e.into());
            }
        };

        self.reset_buffers();
        self.local.set_monitoring(true);
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.monitoring_changed(true);
        }

        info!(%session_id, "Monitoring started");
        Ok(session_id)
    }

    /// Stop the sensor and flush the open session to history before
    /// returning.
    pub fn stop(&self, sensor: &mut dyn SensorSource) -> Result<Option<Session>, MonitorError> {
        if !self.is_monitoring() {
            return Err(MonitorError::NotRunning);
        }

        sensor.stop();
        self.local.set_monitoring(false);
        self.reset_buffers();

        let session = self.sessions.end(Utc::now())?;
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.monitoring_changed(false);
        }

        match &session {
            Some(s) => info!(
                session_id = %s.id,
                samples = s.samples.len(),
                events = s.detected_events.len(),
                "Monitoring stopped"
            ),
            None => info!("Monitoring stopped"),
        }
        Ok(session)
    }

    pub fn handle_event(&self, event: SensorEvent) -> Option<DetectionEvent> {
        match event {
            SensorEvent::HeartRate(sample) => self.process_sample(sample),
            SensorEvent::Motion(reading) => {
                self.process_motion(&reading);
                None
            }
        }
    }

    /// Run one detection cycle for `sample`, then add it to the history.
    pub fn process_sample(&self, sample: HeartRateSample) -> Option<DetectionEvent> {
        if !self.is_monitoring() {
            debug!("Sample ignored, not monitoring");
            return None;
        }
        if !sample.is_valid() {
            warn!(heart_rate = sample.heart_rate, "Dropping invalid sample");
            return None;
        }

        let settings = self.settings.get();
        let evaluation = {
            let mut evaluator = self.evaluator.lock();
            let window = evaluator.engine.params().movement_suppression_window;
            let moving = self
                .movement
                .lock()
                .has_recent_movement(sample.timestamp, window);

            let Evaluator { engine, buffer } = &mut *evaluator;
            let evaluation = engine.evaluate(&sample, buffer, moving, &settings);
            buffer.push(sample.clone());
            evaluation
        };

        self.stats.record_sample();
        let payload = HeartRatePayload {
            bpm: sample.heart_rate,
            timestamp: sample.timestamp,
        };
        self.local.record_heart_rate(payload);
        self.sessions.add_sample(sample);

        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.heart_rate_observed(payload.bpm, payload.timestamp);
        }

        match evaluation {
            Evaluation::Fired(event) => {
                self.stats.record_detection();
                self.fire(&event);
                Some(event)
            }
            Evaluation::Suppressed(reason) => {
                self.stats.record_suppression(reason);
                None
            }
        }
    }

    pub fn process_motion(&self, reading: &AccelerometerReading) -> MovementSample {
        self.stats.record_motion();
        let sample = self.movement.lock().push_reading(reading);
        if sample.is_significant {
            debug!(magnitude = sample.magnitude, "Significant movement");
        }
        sample
    }

    /// Consume the feed in arrival order until `running` is cleared or the
    /// producers hang up. Returns the number of events handled.
    pub fn run_feed(&self, receiver: &Receiver<SensorEvent>, running: &AtomicBool) -> usize {
        let mut handled = 0;

        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(FEED_POLL_INTERVAL) {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Sensor feed disconnected");
                    break;
                }
            }
        }

        handled
    }

    /// Fire a synthetic event through the normal store and alert path.
    pub fn inject_test_event(&self) -> DetectionEvent {
        let event = self.evaluator.lock().engine.inject_test_event(Utc::now());
        info!(event_id = %event.id, "Injected test event");
        self.stats.record_detection();
        self.fire(&event);
        event
    }

    /// Baseline over the buffered history, once enough samples exist.
    pub fn baseline(&self) -> Option<f64> {
        self.evaluator.lock().buffer.baseline()
    }

    pub fn statistics(&self) -> Option<HeartRateStatistics> {
        self.evaluator.lock().buffer.statistics()
    }

    fn fire(&self, event: &DetectionEvent) {
        if let Err(e) = self.events.append(event.clone()) {
            error!(event_id = %event.id, error = %e, "Failed to store detection");
        }
        self.sessions.add_event(event.clone());

        let options = AlertOptions::from_settings(&self.settings.get());
        if let Err(e) = self.alerts.deliver_alert(event, options) {
            self.stats.record_alert_failure();
            warn!(event_id = %event.id, error = %e, "Alert delivery failed");
        }
    }

    fn reset_buffers(&self) {
        let mut evaluator = self.evaluator.lock();
        evaluator.buffer.clear();
        evaluator.engine.reset();
        drop(evaluator);
        self.movement.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertError, LogAlertSink};
    use crate::core::{DetectionParams, LocalZone};
    use crate::models::{DetectionType, Settings, TimeOfDay};
    use crate::sensor::SensorFeed;
    use crate::stats::create_shared_stats;
    use crate::store::{EventLimits, KeyValueStore, MemoryStore};
    use chrono::DateTime;

    struct FailingSensor;

    impl SensorSource for FailingSensor {
        fn start(&mut self) -> Result<(), SensorError> {
            Err(SensorError::NotAuthorized("denied".to_string()))
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    struct RejectingSink;

    impl AlertSink for RejectingSink {
        fn deliver_alert(&self, _: &DetectionEvent, _: AlertOptions) -> Result<(), AlertError> {
            Err(AlertError::NotAuthorized)
        }
        fn deliver_fallback_notification(&self, _: &DetectionEvent) -> Result<(), AlertError> {
            Err(AlertError::NotAuthorized)
        }
    }

    fn monitor_with(alerts: Arc<dyn AlertSink>) -> (Monitor, Arc<EventStore>, Arc<SessionHistory>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let events = Arc::new(EventStore::open(kv.clone(), EventLimits::default()).unwrap());
        let settings = Arc::new(SettingsStore::open(kv.clone()).unwrap());
        settings
            .update(|mut s: Settings| {
                s.sleep_window_start = TimeOfDay::new(0, 0).unwrap();
                s.sleep_window_end = TimeOfDay::new(23, 59).unwrap();
                s
            })
            .unwrap();
        let sessions = Arc::new(SessionHistory::open(kv).unwrap());

        let monitor = Monitor::new(
            DetectionEngine::new(DetectionParams::default(), LocalZone::Named(chrono_tz::UTC)),
            MovementFilter::default(),
            events.clone(),
            settings,
            sessions.clone(),
            alerts,
            Arc::new(LocalStatus::default()),
            create_shared_stats(),
        );
        (monitor, events, sessions)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(1) + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_sensor_failure_leaves_no_session() {
        let (monitor, _, sessions) = monitor_with(Arc::new(LogAlertSink::default()));
        let err = monitor.start(None, &mut FailingSensor).unwrap_err();
        assert!(matches!(err, MonitorError::Sensor(SensorError::NotAuthorized(_))));
        assert!(!monitor.is_monitoring());
        assert!(!sessions.is_open());
    }

    #[test]
    fn test_samples_ignored_when_stopped() {
        let (monitor, _, _) = monitor_with(Arc::new(LogAlertSink::default()));
        assert!(monitor.process_sample(HeartRateSample::new(at(0), 120.0)).is_none());
        assert!(monitor.statistics().is_none());
    }

    #[test]
    fn test_fired_event_stored_and_recorded_in_session() {
        let (monitor, events, sessions) = monitor_with(Arc::new(LogAlertSink::default()));
        let mut feed = SensorFeed::new();
        monitor.start(None, &mut feed).unwrap();

        assert!(monitor.process_sample(HeartRateSample::new(at(0), 65.0)).is_none());
        let event = monitor
            .process_sample(HeartRateSample::new(at(5), 95.0))
            .unwrap();
        assert_eq!(event.detection_type, DetectionType::AbsoluteThreshold);
        assert_eq!(events.len(), 1);

        let session = monitor.stop(&mut feed).unwrap().unwrap();
        assert_eq!(session.samples.len(), 2);
        assert_eq!(session.detected_events.len(), 1);
        assert!(!sessions.is_open());
        assert_eq!(sessions.sessions().len(), 1);
    }

    #[test]
    fn test_alert_failure_does_not_drop_event() {
        let (monitor, events, _) = monitor_with(Arc::new(RejectingSink));
        let event = monitor.inject_test_event();
        assert_eq!(events.get(event.id), Some(event));
        assert_eq!(monitor.stats.snapshot().alerts_failed, 1);
    }

    #[test]
    fn test_movement_blocks_detection() {
        let (monitor, events, _) = monitor_with(Arc::new(LogAlertSink::default()));
        let mut feed = SensorFeed::new();
        monitor.start(None, &mut feed).unwrap();

        monitor.process_sample(HeartRateSample::new(at(0), 65.0));
        monitor.process_motion(&AccelerometerReading::new(at(1), 0.3, 0.0, 0.0));
        assert!(monitor.process_sample(HeartRateSample::new(at(5), 95.0)).is_none());
        assert!(events.is_empty());

        // Outside the 30s window the next qualifying sample fires
        assert!(monitor.process_sample(HeartRateSample::new(at(40), 95.0)).is_some());
    }

    #[test]
    fn test_sensor_movement_flag_alone_does_not_suppress() {
        let (monitor, _, _) = monitor_with(Arc::new(LogAlertSink::default()));
        let mut feed = SensorFeed::new();
        monitor.start(None, &mut feed).unwrap();

        monitor.process_sample(HeartRateSample::new(at(0), 65.0));
        let mut flagged = HeartRateSample::new(at(5), 95.0);
        flagged.is_movement = true;

        let event = monitor.process_sample(flagged).unwrap();
        assert_eq!(event.detection_type, DetectionType::AbsoluteThreshold);
        assert!(!event.was_movement_suppressed);
    }

    #[test]
    fn test_new_session_clears_cooldown() {
        let (monitor, events, _) = monitor_with(Arc::new(LogAlertSink::default()));
        let mut feed = SensorFeed::new();
        monitor.start(None, &mut feed).unwrap();
        monitor.process_sample(HeartRateSample::new(at(0), 65.0));
        assert!(monitor.process_sample(HeartRateSample::new(at(5), 95.0)).is_some());
        monitor.stop(&mut feed).unwrap();

        monitor.start(None, &mut feed).unwrap();
        monitor.process_sample(HeartRateSample::new(at(10), 65.0));
        assert!(monitor.process_sample(HeartRateSample::new(at(15), 95.0)).is_some());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_run_feed_stops_on_disconnect() {
        let (monitor, events, _) = monitor_with(Arc::new(LogAlertSink::default()));
        let mut feed = SensorFeed::new();
        monitor.start(None, &mut feed).unwrap();

        let producer = feed.producer();
        producer.push(SensorEvent::HeartRate(HeartRateSample::new(at(0), 65.0)));
        producer.push(SensorEvent::Motion(AccelerometerReading::new(at(1), 0.0, 0.0, 0.01)));
        producer.push(SensorEvent::HeartRate(HeartRateSample::new(at(2), 95.0)));
        drop(producer);

        let running = AtomicBool::new(true);
        let (receiver, sender_owner) = (feed.receiver().clone(), feed);
        drop(sender_owner);
        assert_eq!(monitor.run_feed(&receiver, &running), 3);
        assert_eq!(events.len(), 1);
    }
}
