//! Detection events: the unit that is stored, exported and synced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which detector produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionType {
    #[serde(rename = "Absolute HR Threshold")]
    AbsoluteThreshold,
    #[serde(rename = "Relative HR Delta")]
    RelativeDelta,
    #[serde(rename = "HRV Drop")]
    HrvDrop,
    #[serde(rename = "ML Model Detection")]
    MlModel,
    #[serde(rename = "Combined Detection")]
    Combined,
}

impl DetectionType {
    /// Human-readable label, also used as the CSV `Type` column.
    pub fn label(&self) -> &'static str {
        match self {
            DetectionType::AbsoluteThreshold => "Absolute HR Threshold",
            DetectionType::RelativeDelta => "Relative HR Delta",
            DetectionType::HrvDrop => "HRV Drop",
            DetectionType::MlModel => "ML Model Detection",
            DetectionType::Combined => "Combined Detection",
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The wearer's response to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertResponse {
    #[default]
    NotResponded,
    Acknowledged,
    Snoozed,
    Dismissed,
}

impl AlertResponse {
    /// Wire/CSV spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertResponse::NotResponded => "notResponded",
            AlertResponse::Acknowledged => "acknowledged",
            AlertResponse::Snoozed => "snoozed",
            AlertResponse::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for AlertResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "acknowledged" | "ack" => Ok(AlertResponse::Acknowledged),
            "snoozed" | "snooze" => Ok(AlertResponse::Snoozed),
            "dismissed" | "dismiss" => Ok(AlertResponse::Dismissed),
            "notresponded" | "none" => Ok(AlertResponse::NotResponded),
            other => Err(format!("unknown alert response '{other}'")),
        }
    }
}

/// A detected arousal event.
///
/// `id` is assigned once at creation and is the merge key across devices.
/// Only the response fields are mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub detection_type: DetectionType,
    pub heart_rate_at_detection: f64,
    pub baseline_heart_rate: Option<f64>,
    pub hrv_at_detection: Option<f64>,
    /// Always within [0, 1]
    pub confidence: f64,
    pub delta_from_baseline: Option<f64>,
    /// Look-back window in seconds for windowed detectors
    pub time_window: Option<f64>,
    pub was_movement_suppressed: bool,

    #[serde(default)]
    pub alert_response: AlertResponse,
    #[serde(default)]
    pub response_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DetectionEvent {
    /// Create an event with a fresh id. Confidence is clamped to [0, 1].
    pub fn new(
        timestamp: DateTime<Utc>,
        detection_type: DetectionType,
        heart_rate: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            detection_type,
            heart_rate_at_detection: heart_rate,
            baseline_heart_rate: None,
            hrv_at_detection: None,
            confidence: clamp_unit(confidence),
            delta_from_baseline: None,
            time_window: None,
            was_movement_suppressed: false,
            alert_response: AlertResponse::NotResponded,
            response_time: None,
            notes: None,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline_heart_rate = Some(baseline);
        self.delta_from_baseline = Some(self.heart_rate_at_detection - baseline);
        self
    }

    pub fn with_hrv(mut self, hrv: Option<f64>) -> Self {
        self.hrv_at_detection = hrv;
        self
    }

    pub fn with_time_window(mut self, seconds: f64) -> Self {
        self.time_window = Some(seconds);
        self
    }

    /// Record the wearer's response.
    pub fn respond(&mut self, response: AlertResponse, at: DateTime<Utc>) {
        self.alert_response = response;
        self.response_time = Some(at);
    }

    pub fn was_acknowledged(&self) -> bool {
        matches!(
            self.alert_response,
            AlertResponse::Acknowledged | AlertResponse::Snoozed
        )
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
