//! Rolling window of accelerometer movement used to suppress false positives.

use crate::sensor::types::{AccelerometerReading, MovementSample};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Number of movement samples retained.
pub const MOVEMENT_BUFFER_CAPACITY: usize = 30;

/// Default g-force above which movement counts as significant.
pub const DEFAULT_MOVEMENT_THRESHOLD: f64 = 0.15;

/// Fixed-capacity movement ring.
#[derive(Debug, Clone)]
pub struct MovementFilter {
    samples: VecDeque<MovementSample>,
    capacity: usize,
    threshold: f64,
}

impl MovementFilter {
    pub fn new(threshold: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(MOVEMENT_BUFFER_CAPACITY),
            capacity: MOVEMENT_BUFFER_CAPACITY,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Append a classified sample, evicting the oldest once full.
    pub fn push(&mut self, sample: MovementSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Classify a raw reading against the threshold and append it.
    pub fn push_reading(&mut self, reading: &AccelerometerReading) -> MovementSample {
        let sample = MovementSample::from_reading(reading, self.threshold);
        self.push(sample);
        sample
    }

    /// True iff a retained significant sample is newer than `now - window`.
    pub fn has_recent_movement(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let cutoff = now - window;
        self.samples
            .iter()
            .any(|m| m.is_significant && m.timestamp > cutoff)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for MovementFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MOVEMENT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_significant_movement() {
        let now = Utc::now();
        let mut filter = MovementFilter::default();
        filter.push(MovementSample::new(now - Duration::seconds(10), 0.4, 0.15));

        assert!(filter.has_recent_movement(now, Duration::seconds(30)));
        assert!(!filter.has_recent_movement(now, Duration::seconds(5)));
    }

    #[test]
    fn test_insignificant_movement_ignored() {
        let now = Utc::now();
        let mut filter = MovementFilter::default();
        filter.push_reading(&AccelerometerReading::new(now, 0.05, 0.02, 0.01));
        assert_eq!(filter.len(), 1);
        assert!(!filter.has_recent_movement(now, Duration::seconds(30)));
    }

    #[test]
    fn test_cutoff_is_exclusive() {
        let now = Utc::now();
        let mut filter = MovementFilter::default();
        filter.push(MovementSample::new(now - Duration::seconds(30), 1.0, 0.15));
        assert!(!filter.has_recent_movement(now, Duration::seconds(30)));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let now = Utc::now();
        let mut filter = MovementFilter::default();
        filter.push(MovementSample::new(now, 1.0, 0.15));
        for i in 0..MOVEMENT_BUFFER_CAPACITY {
            filter.push(MovementSample::new(now + Duration::seconds(i as i64), 0.0, 0.15));
        }
        assert_eq!(filter.len(), MOVEMENT_BUFFER_CAPACITY);
        assert!(!filter.has_recent_movement(now + Duration::seconds(1), Duration::seconds(60)));
    }
}
