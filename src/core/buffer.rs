//! Sliding window of recent heart-rate samples.
//!
//! The buffer keeps a fixed number of samples (oldest evicted first) and
//! answers the baseline and summary questions the detector and the UI ask.

use crate::sensor::types::HeartRateSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Number of samples retained.
pub const SAMPLE_BUFFER_CAPACITY: usize = 60;

/// Number of most-recent samples averaged for the baseline.
pub const BASELINE_WINDOW: usize = 30;

/// Below this many samples `baseline()` reports unavailable.
pub const MIN_BASELINE_SAMPLES: usize = 10;

/// Min, max and mean heart rate over the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Fixed-capacity sample window.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<HeartRateSample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once over capacity.
    pub fn push(&mut self, sample: HeartRateSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples in arrival order, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HeartRateSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&HeartRateSample> {
        self.samples.back()
    }

    /// Mean of the most recent [`BASELINE_WINDOW`] samples, or `None` with
    /// fewer than [`MIN_BASELINE_SAMPLES`] buffered.
    pub fn baseline(&self) -> Option<f64> {
        if self.samples.len() < MIN_BASELINE_SAMPLES {
            return None;
        }
        self.trailing_mean(BASELINE_WINDOW)
    }

    /// Mean heart rate of the `count` most recent samples (fewer if the
    /// buffer is smaller). `None` only when empty.
    pub fn trailing_mean(&self, count: usize) -> Option<f64> {
        if self.samples.is_empty() || count == 0 {
            return None;
        }
        Some(Statistics::mean(
            self.samples.iter().rev().take(count).map(|s| s.heart_rate),
        ))
    }

    /// Summary over the whole buffer.
    pub fn statistics(&self) -> Option<HeartRateStatistics> {
        if self.samples.is_empty() {
            return None;
        }
        let rates = || self.samples.iter().map(|s| s.heart_rate);
        Some(HeartRateStatistics {
            min: Statistics::min(rates()),
            max: Statistics::max(rates()),
            mean: Statistics::mean(rates()),
        })
    }

    /// Lowest heart rate among samples strictly newer than `cutoff`.
    pub fn min_heart_rate_since(&self, cutoff: DateTime<Utc>) -> Option<f64> {
        self.samples
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .map(|s| s.heart_rate)
            .reduce(f64::min)
    }

    /// HRV readings, most recent first.
    pub fn recent_hrv(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().rev().filter_map(|s| s.hrv)
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn filled(rates: &[f64]) -> SampleBuffer {
        let start = Utc::now();
        let mut buffer = SampleBuffer::new();
        for (i, &bpm) in rates.iter().enumerate() {
            buffer.push(HeartRateSample::new(start + Duration::seconds(i as i64), bpm));
        }
        buffer
    }

    #[test]
    fn test_eviction_at_capacity() {
        let rates: Vec<f64> = (0..75).map(|i| 50.0 + i as f64).collect();
        let buffer = filled(&rates);
        assert_eq!(buffer.len(), SAMPLE_BUFFER_CAPACITY);
        assert_eq!(buffer.iter().next().unwrap().heart_rate, 65.0);
        assert_eq!(buffer.latest().unwrap().heart_rate, 124.0);
    }

    #[test]
    fn test_baseline_requires_minimum_samples() {
        assert_eq!(filled(&[60.0; 9]).baseline(), None);
        assert_eq!(filled(&[60.0; 10]).baseline(), Some(60.0));
    }

    #[test]
    fn test_baseline_uses_most_recent_window() {
        // 30 old samples at 100 then 30 recent samples at 60
        let mut rates = vec![100.0; 30];
        rates.extend(vec![60.0; 30]);
        assert_eq!(filled(&rates).baseline(), Some(60.0));
    }

    #[test]
    fn test_statistics() {
        assert_eq!(SampleBuffer::new().statistics(), None);
        let stats = filled(&[55.0, 65.0, 75.0]).statistics().unwrap();
        assert_eq!(stats.min, 55.0);
        assert_eq!(stats.max, 75.0);
        assert_eq!(stats.mean, 65.0);
    }

    #[test]
    fn test_min_since_cutoff() {
        let buffer = filled(&[50.0, 70.0, 65.0]);
        let first = buffer.iter().next().unwrap().timestamp;
        assert_eq!(buffer.min_heart_rate_since(first), Some(65.0));
        assert_eq!(
            buffer.min_heart_rate_since(first - Duration::seconds(1)),
            Some(50.0)
        );
        assert_eq!(
            buffer.min_heart_rate_since(first + Duration::seconds(10)),
            None
        );
    }
}
