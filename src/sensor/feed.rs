//! Channel-backed sensor source.
//!
//! Platform glue (or the simulator) pushes [`SensorEvent`]s into the sender
//! side; the monitoring loop is the single consumer of the receiver side.

use crate::sensor::types::SensorEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Capacity of the feed channel.
const FEED_CAPACITY: usize = 10_000;

/// Errors raised when starting a sensor session.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor session is already running")]
    AlreadyRunning,
    #[error("Sensor authorization denied: {0}")]
    NotAuthorized(String),
    #[error("Failed to start sensor session: {0}")]
    StartFailed(String),
}

/// A source of heart-rate and motion data with an explicit session lifecycle.
pub trait SensorSource: Send {
    /// Begin delivering samples. Failure leaves the source stopped.
    fn start(&mut self) -> Result<(), SensorError>;

    /// Stop delivering samples. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Sensor source fed through a bounded crossbeam channel.
pub struct SensorFeed {
    sender: Sender<SensorEvent>,
    receiver: Receiver<SensorEvent>,
    running: Arc<AtomicBool>,
}

impl SensorFeed {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(FEED_CAPACITY);
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for producers.
    pub fn producer(&self) -> FeedProducer {
        FeedProducer {
            sender: self.sender.clone(),
            running: self.running.clone(),
        }
    }

    /// Get the receiver for sensor events.
    pub fn receiver(&self) -> &Receiver<SensorEvent> {
        &self.receiver
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<SensorEvent> {
        self.receiver.try_recv().ok()
    }

    /// Discard anything still queued.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl Default for SensorFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SensorFeed {
    fn start(&mut self) -> Result<(), SensorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SensorError::AlreadyRunning);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Producer side of a [`SensorFeed`]. Events pushed while the feed is stopped
/// are dropped.
#[derive(Clone)]
pub struct FeedProducer {
    sender: Sender<SensorEvent>,
    running: Arc<AtomicBool>,
}

impl FeedProducer {
    /// Push an event; returns false if it was dropped.
    pub fn push(&self, event: SensorEvent) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Sensor feed full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
