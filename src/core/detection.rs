//! Arousal detection.
//!
//! One [`DetectionEngine::evaluate`] call is one detection cycle. A cycle
//! passes four gates (history, sleep window, cooldown, movement) and then
//! tries the classifiers in priority order; the first to fire wins.
//!
//! The engine only classifies. Storing the event, adding it to the open
//! session and alerting are the monitor's job.

use crate::core::buffer::{SampleBuffer, BASELINE_WINDOW};
use crate::core::zone::LocalZone;
use crate::models::{DetectionEvent, DetectionType, Settings};
use crate::sensor::HeartRateSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use tracing::{debug, info};

/// HRV-bearing history samples required before the HRV check runs.
pub const HRV_MIN_SAMPLES: usize = 5;

/// Most-recent HRV samples averaged for the HRV baseline.
pub const HRV_BASELINE_SAMPLES: usize = 10;

/// Tuning that is not part of the user's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub alert_cooldown: Duration,
    pub relative_window: Duration,
    pub hrv_drop_threshold_pct: f64,
    pub movement_suppression_window: Duration,
    /// Evaluate through movement instead of suppressing
    pub ignore_movement: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            alert_cooldown: Duration::seconds(300),
            relative_window: Duration::seconds(60),
            hrv_drop_threshold_pct: 30.0,
            movement_suppression_window: Duration::seconds(30),
            ignore_movement: false,
        }
    }
}

/// Why a cycle ended without an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    EmptyHistory,
    OutsideSleepWindow,
    Cooldown,
    Movement,
    /// All gates passed but no classifier fired
    BelowThreshold,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Suppression::EmptyHistory => "no history",
            Suppression::OutsideSleepWindow => "outside sleep window",
            Suppression::Cooldown => "cooldown",
            Suppression::Movement => "movement",
            Suppression::BelowThreshold => "below threshold",
        };
        f.write_str(reason)
    }
}

/// Outcome of one detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Fired(DetectionEvent),
    Suppressed(Suppression),
}

impl Evaluation {
    pub fn event(&self) -> Option<&DetectionEvent> {
        match self {
            Evaluation::Fired(event) => Some(event),
            Evaluation::Suppressed(_) => None,
        }
    }

    pub fn into_event(self) -> Option<DetectionEvent> {
        match self {
            Evaluation::Fired(event) => Some(event),
            Evaluation::Suppressed(_) => None,
        }
    }
}

/// Stateful classifier. The only state carried between cycles is the time
/// of the last fired event.
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    params: DetectionParams,
    zone: LocalZone,
    last_detection_time: Option<DateTime<Utc>>,
}

impl DetectionEngine {
    pub fn new(params: DetectionParams, zone: LocalZone) -> Self {
        Self {
            params,
            zone,
            last_detection_time: None,
        }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn last_detection_time(&self) -> Option<DateTime<Utc>> {
        self.last_detection_time
    }

    /// Forget the cooldown clock, e.g. when a new session starts.
    pub fn reset(&mut self) {
        self.last_detection_time = None;
    }

    /// Run one cycle for `sample` against the history buffered before it.
    ///
    /// The cycle is evaluated at the sample's timestamp. Only a fired event
    /// moves the cooldown clock.
    pub fn evaluate(
        &mut self,
        sample: &HeartRateSample,
        history: &SampleBuffer,
        movement_detected: bool,
        settings: &Settings,
    ) -> Evaluation {
        let now = sample.timestamp;

        if let Some(reason) = self.gate(now, history, movement_detected, settings) {
            debug!(heart_rate = sample.heart_rate, %reason, "Detection suppressed");
            return Evaluation::Suppressed(reason);
        }

        // Gate 1 guarantees a value
        let baseline = history
            .trailing_mean(BASELINE_WINDOW)
            .unwrap_or(sample.heart_rate);

        let detected = self
            .check_absolute(sample, baseline, settings)
            .or_else(|| self.check_relative(sample, history, baseline, settings))
            .or_else(|| self.check_hrv_drop(sample, history));

        match detected {
            Some(mut event) => {
                event.was_movement_suppressed = movement_detected;
                self.last_detection_time = Some(event.timestamp);
                info!(
                    event_id = %event.id,
                    detection_type = %event.detection_type,
                    heart_rate = event.heart_rate_at_detection,
                    baseline = ?event.baseline_heart_rate,
                    confidence = event.confidence,
                    "Arousal detected"
                );
                Evaluation::Fired(event)
            }
            None => Evaluation::Suppressed(Suppression::BelowThreshold),
        }
    }

    /// Build the synthetic event used to exercise the alert path, and start
    /// the cooldown as a real detection would.
    pub fn inject_test_event(&mut self, now: DateTime<Utc>) -> DetectionEvent {
        let event = DetectionEvent::new(now, DetectionType::AbsoluteThreshold, 95.0, 0.9)
            .with_baseline(65.0);
        self.last_detection_time = Some(event.timestamp);
        event
    }

    fn gate(
        &self,
        now: DateTime<Utc>,
        history: &SampleBuffer,
        movement_detected: bool,
        settings: &Settings,
    ) -> Option<Suppression> {
        if history.is_empty() {
            return Some(Suppression::EmptyHistory);
        }

        if !settings.is_within_sleep_window(self.zone.minute_of_day(now)) {
            return Some(Suppression::OutsideSleepWindow);
        }

        if let Some(last) = self.last_detection_time {
            if now - last < self.params.alert_cooldown {
                return Some(Suppression::Cooldown);
            }
        }

        if movement_detected && !self.params.ignore_movement {
            return Some(Suppression::Movement);
        }

        None
    }

    fn check_absolute(
        &self,
        sample: &HeartRateSample,
        baseline: f64,
        settings: &Settings,
    ) -> Option<DetectionEvent> {
        let threshold = settings.effective_absolute_threshold();
        if sample.heart_rate <= threshold {
            return None;
        }

        let confidence = (sample.heart_rate - threshold) / threshold;
        Some(
            DetectionEvent::new(
                sample.timestamp,
                DetectionType::AbsoluteThreshold,
                sample.heart_rate,
                confidence,
            )
            .with_baseline(baseline)
            .with_hrv(sample.hrv),
        )
    }

    fn check_relative(
        &self,
        sample: &HeartRateSample,
        history: &SampleBuffer,
        baseline: f64,
        settings: &Settings,
    ) -> Option<DetectionEvent> {
        let threshold = settings.effective_relative_delta();
        let cutoff = sample.timestamp - self.params.relative_window;
        let min_hr = history.min_heart_rate_since(cutoff).unwrap_or(baseline);

        let delta = sample.heart_rate - min_hr;
        if delta <= threshold {
            return None;
        }

        Some(
            DetectionEvent::new(
                sample.timestamp,
                DetectionType::RelativeDelta,
                sample.heart_rate,
                delta / threshold,
            )
            .with_baseline(baseline)
            .with_hrv(sample.hrv)
            .with_time_window(self.params.relative_window.num_milliseconds() as f64 / 1000.0),
        )
    }

    fn check_hrv_drop(
        &self,
        sample: &HeartRateSample,
        history: &SampleBuffer,
    ) -> Option<DetectionEvent> {
        let current = sample.hrv?;

        let recent: Vec<f64> = history.recent_hrv().collect();
        if recent.len() < HRV_MIN_SAMPLES {
            return None;
        }

        let baseline_hrv = Statistics::mean(recent.iter().take(HRV_BASELINE_SAMPLES));
        if baseline_hrv.is_nan() || baseline_hrv <= 0.0 {
            return None;
        }

        let threshold = self.params.hrv_drop_threshold_pct;
        let drop_pct = (baseline_hrv - current) / baseline_hrv * 100.0;
        if drop_pct <= threshold {
            return None;
        }

        Some(
            DetectionEvent::new(
                sample.timestamp,
                DetectionType::HrvDrop,
                sample.heart_rate,
                drop_pct / threshold,
            )
            .with_hrv(Some(current)),
        )
    }
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new(DetectionParams::default(), LocalZone::System)
    }
}
