//! Sensor collaborator boundary.
//!
//! This module defines the sample types the platform delivers and a
//! channel-backed source the monitoring loop consumes in arrival order.

pub mod feed;
pub mod types;

// Re-export commonly used types
pub use feed::{FeedProducer, SensorError, SensorFeed, SensorSource};
pub use types::{AccelerometerReading, HeartRateSample, MovementSample, SensorEvent};
