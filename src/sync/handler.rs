//! Applying messages received from the peer.

use super::link::{PeerLink, SyncError};
use super::message::{HeartRatePayload, Reply, SyncMessage};
use super::transport::ReplySender;
use crate::alert::AlertSink;
use crate::config::Role;
use crate::models::{DetectionEvent, Settings};
use crate::monitor::LocalStatus;
use crate::stats::SharedStats;
use crate::store::{EventStore, SettingsStore};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Merges peer state into the local stores and answers requests.
pub struct SyncHandler {
    role: Role,
    link: PeerLink,
    events: Arc<EventStore>,
    settings: Arc<SettingsStore>,
    local: Arc<LocalStatus>,
    alerts: Arc<dyn AlertSink>,
    stats: SharedStats,
    fallback_recency: Duration,
}

impl SyncHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Role,
        link: PeerLink,
        events: Arc<EventStore>,
        settings: Arc<SettingsStore>,
        local: Arc<LocalStatus>,
        alerts: Arc<dyn AlertSink>,
        stats: SharedStats,
        fallback_recency: Duration,
    ) -> Self {
        Self {
            role,
            link,
            events,
            settings,
            local,
            alerts,
            stats,
            fallback_recency,
        }
    }

    /// Decode and apply a raw payload, answering on `reply` if given.
    /// Undecodable payloads are dropped.
    pub fn handle(&self, payload: &[u8], reply: Option<ReplySender>) {
        self.stats.record_message_received();

        let message = match SyncMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(error = %e, len = payload.len(), "Dropping undecodable message");
                return;
            }
        };

        debug!(kind = message.kind(), "Message received");
        let answer = self.handle_message(message);

        if let Some(reply) = reply {
            let Some(answer) = answer else { return };
            match answer.to_bytes() {
                Ok(bytes) => {
                    if reply.send(bytes).is_err() {
                        debug!("Requester gone before reply");
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode reply"),
            }
        }
    }

    /// Apply one message. Returns the reply to send when the sender asked
    /// for one.
    pub fn handle_message(&self, message: SyncMessage) -> Option<Reply> {
        match message {
            SyncMessage::Settings { data } => {
                match serde_json::from_slice::<Settings>(&data) {
                    Ok(settings) => {
                        if let Err(e) = self.settings.replace_from_peer(settings) {
                            warn!(error = %e, "Failed to apply peer settings");
                        }
                    }
                    Err(e) => self.decode_failed("settings", e),
                }
                Some(Reply::Received)
            }
            SyncMessage::Events { data } => {
                match serde_json::from_slice::<Vec<DetectionEvent>>(&data) {
                    Ok(incoming) => {
                        self.merge(incoming);
                    }
                    Err(e) => self.decode_failed("events", e),
                }
                Some(Reply::Received)
            }
            SyncMessage::HeartRate { bpm, timestamp } => {
                self.link.record_peer_heart_rate(HeartRatePayload { bpm, timestamp });
                Some(Reply::Received)
            }
            SyncMessage::StatusUpdate { is_monitoring } => {
                info!(is_monitoring, "Peer monitoring status changed");
                self.link.record_peer_monitoring(is_monitoring);
                Some(Reply::Received)
            }
            SyncMessage::Pong { is_monitoring, .. } => {
                self.link.record_peer_monitoring(is_monitoring);
                Some(Reply::Received)
            }
            SyncMessage::Ping { .. } => Some(Reply::Pong {
                is_monitoring: self.local.is_monitoring(),
                timestamp: Utc::now(),
            }),
            SyncMessage::EventsRequest => match serde_json::to_vec(&self.events.all()) {
                Ok(data) => Some(Reply::Events { data }),
                Err(e) => {
                    error!(error = %e, "Failed to encode events for peer");
                    None
                }
            },
            SyncMessage::SettingsRequest => match self.settings.encoded() {
                Ok(data) => Some(Reply::Settings { data }),
                Err(e) => {
                    error!(error = %e, "Failed to encode settings for peer");
                    None
                }
            },
            SyncMessage::StatusRequest => Some(Reply::Status {
                is_monitoring: self.local.is_monitoring(),
            }),
            SyncMessage::HeartRateRequest => Some(Reply::HeartRate {
                payload: self.local.latest_heart_rate(),
            }),
        }
    }

    /// Pull the peer's full event list and merge it. Returns the number of
    /// events added.
    pub async fn refresh_from_peer(&self) -> Result<usize, SyncError> {
        let incoming = self.link.request_events().await?;
        Ok(self.merge(incoming))
    }

    fn merge(&self, incoming: Vec<DetectionEvent>) -> usize {
        let received = incoming.len();
        let added = match self.events.merge_from_peer(incoming) {
            Ok(added) => added,
            Err(e) => {
                warn!(error = %e, "Failed to merge peer events");
                return 0;
            }
        };

        self.stats.record_events_merged(added.len() as u64);
        debug!(received, added = added.len(), "Merged peer events");

        if self.role == Role::Companion {
            self.notify_recent(&added);
        }
        added.len()
    }

    /// Fallback notifications for fresh events only; backfill stays silent.
    fn notify_recent(&self, added: &[DetectionEvent]) {
        if !self.settings.get().notifications_enabled {
            return;
        }

        let cutoff = Utc::now() - self.fallback_recency;
        for event in added.iter().filter(|e| e.timestamp >= cutoff) {
            if let Err(e) = self.alerts.deliver_fallback_notification(event) {
                self.stats.record_alert_failure();
                warn!(event_id = %event.id, error = %e, "Fallback notification failed");
            }
        }
    }

    fn decode_failed(&self, kind: &'static str, e: serde_json::Error) {
        self.stats.record_decode_failure();
        warn!(kind, error = %e, "Dropping undecodable payload");
    }
}
