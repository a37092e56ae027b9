//! Sample types delivered by the sensor collaborator.
//!
//! Heart-rate samples are immutable once created. Motion arrives as raw
//! accelerometer vectors; magnitude and significance are computed here so the
//! threshold stays under our control rather than the platform's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single heart-rate reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Beats per minute, always positive
    pub heart_rate: f64,
    /// Heart-rate variability in milliseconds (SDNN or RMSSD)
    pub hrv: Option<f64>,
    /// Set by the sensor when it already knows the wearer was moving
    pub is_movement: bool,
}

impl HeartRateSample {
    pub fn new(timestamp: DateTime<Utc>, heart_rate: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            heart_rate,
            hrv: None,
            is_movement: false,
        }
    }

    /// Attach an HRV reading.
    pub fn with_hrv(mut self, hrv: f64) -> Self {
        self.hrv = Some(hrv);
        self
    }

    /// Rejects readings a detector should never see (zero, negative, NaN).
    pub fn is_valid(&self) -> bool {
        self.heart_rate.is_finite() && self.heart_rate > 0.0
    }
}

/// A raw accelerometer vector in g.
///
/// Readings are expected to be user acceleration (gravity removed), so a
/// wearer lying still reads close to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerReading {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerometerReading {
    pub fn new(timestamp: DateTime<Utc>, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    /// Euclidean magnitude of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Movement magnitude classified against a g-force threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSample {
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
    pub is_significant: bool,
}

impl MovementSample {
    pub fn new(timestamp: DateTime<Utc>, magnitude: f64, threshold: f64) -> Self {
        Self {
            timestamp,
            magnitude,
            is_significant: magnitude > threshold,
        }
    }

    /// Classify a raw accelerometer reading.
    pub fn from_reading(reading: &AccelerometerReading, threshold: f64) -> Self {
        Self::new(reading.timestamp, reading.magnitude(), threshold)
    }
}

/// Unified event type for the sensor feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SensorEvent {
    HeartRate(HeartRateSample),
    Motion(AccelerometerReading),
}

impl SensorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SensorEvent::HeartRate(s) => s.timestamp,
            SensorEvent::Motion(r) => r.timestamp,
        }
    }
}
