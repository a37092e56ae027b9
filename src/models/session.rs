//! Monitoring sessions and their night summaries.
//!
//! Sessions are a local-only grouping of the samples and events observed
//! while monitoring was active. They are never synced.

use crate::models::event::DetectionEvent;
use crate::sensor::types::HeartRateSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use uuid::Uuid;

/// When the wearer last ate, recorded at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealTiming {
    pub last_meal_time: Option<DateTime<Utc>>,
    pub is_unknown: bool,
}

impl MealTiming {
    pub fn at(last_meal_time: DateTime<Utc>) -> Self {
        Self {
            last_meal_time: Some(last_meal_time),
            is_unknown: false,
        }
    }

    pub fn unknown() -> Self {
        Self {
            last_meal_time: None,
            is_unknown: true,
        }
    }

    /// Hours between the last meal and `session_start`.
    pub fn hours_since_last_meal(&self, session_start: DateTime<Utc>) -> Option<f64> {
        self.last_meal_time
            .map(|meal| (session_start - meal).num_seconds() as f64 / 3600.0)
    }
}

/// One monitoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    /// None while monitoring is active
    pub end_time: Option<DateTime<Utc>>,
    pub samples: Vec<HeartRateSample>,
    pub detected_events: Vec<DetectionEvent>,
    pub meal_timing: Option<MealTiming>,
}

impl Session {
    pub fn open(start_time: DateTime<Utc>, meal_timing: Option<MealTiming>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time,
            end_time: None,
            samples: Vec::new(),
            detected_events: Vec::new(),
            meal_timing,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed time; open sessions measure up to `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }

    pub fn average_heart_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(Statistics::mean(self.samples.iter().map(|s| s.heart_rate)))
    }

    pub fn max_heart_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(Statistics::max(self.samples.iter().map(|s| s.heart_rate)))
    }

    pub fn min_heart_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(Statistics::min(self.samples.iter().map(|s| s.heart_rate)))
    }

    /// Summary of a closed session with at least one sample.
    pub fn summary(&self) -> Option<NightSummary> {
        let end = self.end_time?;
        let average_heart_rate = self.average_heart_rate()?;
        let max_heart_rate = self.max_heart_rate()?;
        let min_heart_rate = self.min_heart_rate()?;

        let hrv: Vec<f64> = self.samples.iter().filter_map(|s| s.hrv).collect();
        let average_hrv = if hrv.is_empty() {
            None
        } else {
            Some(Statistics::mean(&hrv))
        };

        Some(NightSummary {
            session_id: self.id,
            monitoring_start_time: self.start_time,
            monitoring_end_time: end,
            total_events: self.detected_events.len(),
            acknowledged_events: self
                .detected_events
                .iter()
                .filter(|e| e.was_acknowledged())
                .count(),
            average_heart_rate,
            max_heart_rate,
            min_heart_rate,
            average_hrv,
        })
    }
}

/// Summary statistics for a night's monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightSummary {
    pub session_id: Uuid,
    pub monitoring_start_time: DateTime<Utc>,
    pub monitoring_end_time: DateTime<Utc>,
    pub total_events: usize,
    pub acknowledged_events: usize,
    pub average_heart_rate: f64,
    pub max_heart_rate: f64,
    pub min_heart_rate: f64,
    pub average_hrv: Option<f64>,
}

impl NightSummary {
    pub fn duration(&self) -> Duration {
        self.monitoring_end_time - self.monitoring_start_time
    }
}
