//! Wire messages exchanged between the two peers.
//!
//! Every message is a JSON object with a `type` tag. Settings and event
//! batches travel as the JSON-encoded bytes of the record, so the receiver
//! can drop an undecodable payload without losing the envelope.

use crate::models::{DetectionEvent, Settings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message sent over the link, fire-and-forget or as a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    /// Full settings snapshot
    Settings { data: Vec<u8> },

    /// Event batch; merged add-if-absent by id
    #[serde(alias = "event")]
    Events { data: Vec<u8> },

    /// Latest heart rate of the sender
    HeartRate {
        bpm: f64,
        #[serde(with = "epoch_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// Sender started or stopped monitoring
    #[serde(rename_all = "camelCase")]
    StatusUpdate { is_monitoring: bool },

    /// Unsolicited pong
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default)]
        is_monitoring: bool,
        #[serde(with = "epoch_seconds")]
        timestamp: DateTime<Utc>,
    },

    Ping {
        #[serde(with = "epoch_seconds")]
        timestamp: DateTime<Utc>,
    },

    EventsRequest,
    SettingsRequest,
    StatusRequest,
    HeartRateRequest,
}

impl SyncMessage {
    pub fn settings(settings: &Settings) -> Result<Self, serde_json::Error> {
        Ok(SyncMessage::Settings {
            data: serde_json::to_vec(settings)?,
        })
    }

    pub fn events(events: &[DetectionEvent]) -> Result<Self, serde_json::Error> {
        Ok(SyncMessage::Events {
            data: serde_json::to_vec(events)?,
        })
    }

    /// The `type` tag value.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Settings { .. } => "settings",
            SyncMessage::Events { .. } => "events",
            SyncMessage::HeartRate { .. } => "heartRate",
            SyncMessage::StatusUpdate { .. } => "statusUpdate",
            SyncMessage::Pong { .. } => "pong",
            SyncMessage::Ping { .. } => "ping",
            SyncMessage::EventsRequest => "eventsRequest",
            SyncMessage::SettingsRequest => "settingsRequest",
            SyncMessage::StatusRequest => "statusRequest",
            SyncMessage::HeartRateRequest => "heartRateRequest",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Latest heart-rate value as carried in replies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRatePayload {
    pub bpm: f64,
    #[serde(with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// Answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    #[serde(rename_all = "camelCase")]
    Pong {
        is_monitoring: bool,
        #[serde(with = "epoch_seconds")]
        timestamp: DateTime<Utc>,
    },
    Events {
        data: Vec<u8>,
    },
    Settings {
        data: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        is_monitoring: bool,
    },
    HeartRate {
        #[serde(default)]
        payload: Option<HeartRatePayload>,
    },
    /// Acknowledges a fire-and-forget message sent with a reply channel
    Received,
}

impl Reply {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Serde support for timestamps as fractional Unix epoch seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = timestamp.timestamp_micros() as f64 / 1_000_000.0;
        secs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() {
            return Err(de::Error::custom("timestamp is not finite"));
        }
        DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
            .ok_or_else(|| de::Error::custom("timestamp out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_type_tags() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();

        let value = serde_json::to_value(SyncMessage::HeartRate {
            bpm: 71.0,
            timestamp: ts,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "heartRate", "bpm": 71.0, "timestamp": 1710036000.0}));

        let value =
            serde_json::to_value(SyncMessage::StatusUpdate { is_monitoring: true }).unwrap();
        assert_eq!(value, json!({"type": "statusUpdate", "isMonitoring": true}));

        let value = serde_json::to_value(SyncMessage::EventsRequest).unwrap();
        assert_eq!(value, json!({"type": "eventsRequest"}));
    }

    #[test]
    fn test_legacy_event_tag() {
        let message: SyncMessage =
            serde_json::from_value(json!({"type": "event", "data": [91, 93]})).unwrap();
        assert_eq!(message, SyncMessage::Events { data: b"[]".to_vec() });
    }

    #[test]
    fn test_pong_without_monitoring_flag() {
        let message: SyncMessage =
            serde_json::from_value(json!({"type": "pong", "timestamp": 1710036000.5})).unwrap();
        match message {
            SyncMessage::Pong { is_monitoring, timestamp } => {
                assert!(!is_monitoring);
                assert_eq!(timestamp.timestamp_millis(), 1_710_036_000_500);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(SyncMessage::from_bytes(br#"{"type": "teleport"}"#).is_err());
        assert!(SyncMessage::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_reply_tags() {
        let value = serde_json::to_value(Reply::Status { is_monitoring: false }).unwrap();
        assert_eq!(value, json!({"type": "status", "isMonitoring": false}));
        assert_eq!(serde_json::to_value(Reply::Received).unwrap(), json!({"type": "received"}));
        assert_eq!(
            serde_json::to_value(Reply::HeartRate { payload: None }).unwrap(),
            json!({"type": "heartRate", "payload": null})
        );
    }
}
