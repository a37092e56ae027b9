//! Delivery of alerts to the wearer.
//!
//! The platform side (haptics, notification center) sits behind
//! [`AlertSink`]. Delivery is fire-and-forget: callers log a failure and
//! carry on.

use crate::models::{DetectionEvent, Settings};
use thiserror::Error;
use tracing::{info, warn};

pub const ALERT_TITLE: &str = "Arousal Event Detected";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Notifications not authorized")]
    NotAuthorized,
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
}

/// How a detection alert should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertOptions {
    pub with_sound: bool,
    pub with_haptics: bool,
    pub notify: bool,
}

impl AlertOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            with_sound: settings.enable_audible_alarm,
            with_haptics: settings.enable_haptics,
            notify: settings.notifications_enabled,
        }
    }
}

pub trait AlertSink: Send + Sync {
    /// Alert on the device that detected the event.
    fn deliver_alert(
        &self,
        event: &DetectionEvent,
        options: AlertOptions,
    ) -> Result<(), AlertError>;

    /// Notify on the companion when the wearable could not alert.
    fn deliver_fallback_notification(&self, event: &DetectionEvent) -> Result<(), AlertError>;
}

/// Notification body for a detection alert.
pub fn alert_body(event: &DetectionEvent) -> String {
    format!("Heart rate: {} bpm", event.heart_rate_at_detection.round() as i64)
}

/// Notification body for a companion fallback.
pub fn fallback_body(event: &DetectionEvent) -> String {
    format!(
        "Heart rate elevated to {} bpm",
        event.heart_rate_at_detection.round() as i64
    )
}

/// Sink that writes alerts to the log. Used by the CLI and simulation.
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink {
    label: String,
}

impl LogAlertSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl AlertSink for LogAlertSink {
    fn deliver_alert(
        &self,
        event: &DetectionEvent,
        options: AlertOptions,
    ) -> Result<(), AlertError> {
        if options.with_haptics {
            info!(device = %self.label, event_id = %event.id, "Haptic alert");
        }
        if options.notify {
            info!(
                device = %self.label,
                event_id = %event.id,
                sound = options.with_sound,
                "{}: {}",
                ALERT_TITLE,
                alert_body(event)
            );
        } else if !options.with_haptics {
            warn!(
                device = %self.label,
                event_id = %event.id,
                "Alert delivered with haptics and notifications disabled"
            );
        }
        Ok(())
    }

    fn deliver_fallback_notification(&self, event: &DetectionEvent) -> Result<(), AlertError> {
        info!(
            device = %self.label,
            event_id = %event.id,
            "{}: {}",
            ALERT_TITLE,
            fallback_body(event)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionType;
    use chrono::Utc;

    #[test]
    fn test_options_follow_settings() {
        let settings = Settings {
            enable_audible_alarm: true,
            enable_haptics: false,
            ..Settings::default()
        };
        let options = AlertOptions::from_settings(&settings);
        assert!(options.with_sound);
        assert!(!options.with_haptics);
        assert!(options.notify);
    }

    #[test]
    fn test_bodies() {
        let event = DetectionEvent::new(Utc::now(), DetectionType::RelativeDelta, 87.6, 0.5);
        assert_eq!(alert_body(&event), "Heart rate: 88 bpm");
        assert_eq!(fallback_body(&event), "Heart rate elevated to 88 bpm");
        assert!(LogAlertSink::new("test").deliver_fallback_notification(&event).is_ok());
    }
}
