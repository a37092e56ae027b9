//! Detection core.
//!
//! This module contains:
//! - The sliding heart-rate buffer and its baseline
//! - The accelerometer movement filter
//! - The detection engine (gating and classification)
//! - Local time-of-day conversion for the sleep window

pub mod buffer;
pub mod detection;
pub mod movement;
pub mod zone;

pub use buffer::{HeartRateStatistics, SampleBuffer, BASELINE_WINDOW, SAMPLE_BUFFER_CAPACITY};
pub use detection::{DetectionEngine, DetectionParams, Evaluation, Suppression};
pub use movement::{MovementFilter, DEFAULT_MOVEMENT_THRESHOLD};
pub use zone::{LocalZone, ZoneError};
