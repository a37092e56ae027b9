//! Link state, activation retry, probing and the delivery policy.
//!
//! ```text
//! Inactive ──activate()──▶ Activating ──activation complete──▶ Activated{reachable}
//!     ▲                                                           │
//!     └────────────────────────── deactivated ────────────────────┘
//! ```
//!
//! While activated but not yet confirmed connected, a retry task ticks at a
//! fixed interval, re-requesting activation and probing, until the peer
//! answers, the link becomes reachable, or the retry cap is hit.

use super::message::{HeartRatePayload, Reply, SyncMessage};
use super::transport::{ActivationState, Transport, TransportError};
use crate::config::{Role, SyncConfig};
use crate::models::{DetectionEvent, Settings};
use crate::monitor::LocalStatus;
use crate::stats::SharedStats;
use crate::store::{StoreError, SyncOutbox};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Peer not reachable")]
    Unreachable,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected reply to {request}: {reply}")]
    UnexpectedReply { request: &'static str, reply: String },

    #[error("No tokio runtime available for the peer link")]
    NoRuntime,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Link state as seen by this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LinkState {
    Inactive,
    Activating,
    Activated { reachable: bool },
}

/// Observable link status, shown as a connectivity badge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub last_status_check: Option<DateTime<Utc>>,
    pub last_handshake_succeeded: Option<bool>,
    pub last_handshake_error: Option<String>,
    pub peer_is_monitoring: bool,
    pub peer_heart_rate: Option<HeartRatePayload>,
    pub activation_retries: u32,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Inactive,
            last_status_check: None,
            last_handshake_succeeded: None,
            last_handshake_error: None,
            peer_is_monitoring: false,
            peer_heart_rate: None,
            activation_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub retry_interval: Duration,
    pub max_activation_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            max_activation_retries: 5,
        }
    }
}

impl From<&SyncConfig> for LinkConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retry_interval: config.retry_interval,
            max_activation_retries: config.max_activation_retries,
        }
    }
}

struct LinkInner {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    role: Role,
    local: Arc<LocalStatus>,
    stats: SharedStats,
    runtime: Handle,
    status: Mutex<LinkStatus>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to this side of the peer link. Clones share state.
#[derive(Clone)]
pub struct PeerLink {
    inner: Arc<LinkInner>,
}

impl PeerLink {
    /// Must be called from within a tokio runtime; background work is
    /// spawned on it.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        role: Role,
        local: Arc<LocalStatus>,
        stats: SharedStats,
    ) -> Result<Self, SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        Ok(Self {
            inner: Arc::new(LinkInner {
                transport,
                config,
                role,
                local,
                stats,
                runtime,
                status: Mutex::new(LinkStatus::default()),
                retry_task: Mutex::new(None),
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.status.lock().clone()
    }

    pub fn state(&self) -> LinkState {
        self.inner.status.lock().state
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.transport.is_reachable()
    }

    fn is_connected(&self) -> bool {
        self.inner.transport.activation_state() == ActivationState::Activated
            && self.inner.transport.is_reachable()
    }

    /// Request platform activation. Completion is reported through
    /// [`on_activation_complete`](Self::on_activation_complete).
    pub fn activate(&self) {
        {
            let mut status = self.inner.status.lock();
            if status.state == LinkState::Inactive {
                status.state = LinkState::Activating;
            }
        }

        if let Err(e) = self.inner.transport.activate() {
            warn!(error = %e, "Activation request failed");
            let mut status = self.inner.status.lock();
            status.state = LinkState::Inactive;
            status.last_handshake_succeeded = Some(false);
            status.last_handshake_error = Some(e.to_string());
            status.last_status_check = Some(Utc::now());
            return;
        }

        if self.inner.transport.activation_state() == ActivationState::Activated {
            self.refresh_state();
        }
    }

    pub fn on_activation_complete(&self, state: ActivationState, error: Option<String>) {
        if let Some(reason) = error {
            warn!(%state, error = %reason, "Activation completed with error");
            let mut status = self.inner.status.lock();
            status.state = LinkState::Inactive;
            status.last_handshake_succeeded = Some(false);
            status.last_handshake_error = Some(reason);
            status.last_status_check = Some(Utc::now());
            return;
        }

        if state != ActivationState::Activated {
            debug!(%state, "Activation completed without activating");
            self.inner.status.lock().state = LinkState::Inactive;
            return;
        }

        let reachable = self.refresh_state();
        info!(reachable, role = %self.inner.role, "Link activated");

        self.start_activation_retry();
        self.spawn_probe();
        if reachable {
            self.push_latest_heart_rate();
        }
    }

    pub fn on_reachability_changed(&self, reachable: bool) {
        self.refresh_state();
        info!(reachable, "Peer reachability changed");

        if reachable {
            self.stop_activation_retry();
            self.spawn_probe();
            self.push_latest_heart_rate();
        }
    }

    pub fn on_deactivated(&self) {
        info!("Link deactivated, reactivating");
        self.inner.status.lock().state = LinkState::Inactive;
        self.activate();
    }

    /// Start the activation retry task, replacing any running one.
    pub fn start_activation_retry(&self) {
        self.stop_activation_retry();
        self.inner.status.lock().activation_retries = 0;

        let weak: Weak<LinkInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.retry_interval;
        let max_retries = self.inner.config.max_activation_retries;

        let task = self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let link = PeerLink { inner };

                if link.is_connected() {
                    debug!("Connection established, stopping retry");
                    break;
                }

                let attempt = {
                    let mut status = link.inner.status.lock();
                    status.activation_retries += 1;
                    status.activation_retries
                };
                if attempt > max_retries {
                    warn!(max_retries, "Max activation retries reached");
                    break;
                }

                debug!(attempt, "Retrying activation");
                link.activate();
                if link.inner.transport.activation_state() == ActivationState::Activated {
                    link.probe().await;
                }
            }
        });

        *self.inner.retry_task.lock() = Some(task);
    }

    /// Cancel the retry task. Safe to call when none is running.
    pub fn stop_activation_retry(&self) {
        if let Some(task) = self.inner.retry_task.lock().take() {
            task.abort();
        }
    }

    pub fn is_retrying(&self) -> bool {
        self.inner
            .retry_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Ping the peer and record whether it answered.
    pub async fn probe(&self) -> bool {
        if self.inner.transport.activation_state() != ActivationState::Activated {
            self.activate();
            self.record_handshake(Err("Link is not activated".to_string()));
            return false;
        }

        self.refresh_state();
        if !self.inner.transport.is_reachable() {
            self.record_handshake(Err("Peer is not reachable".to_string()));
            return false;
        }

        let ping = SyncMessage::Ping {
            timestamp: Utc::now(),
        };
        match self.exchange(&ping).await {
            Ok(reply) => {
                debug!(?reply, "Probe answered");
                self.record_handshake(Ok(()));
                self.stop_activation_retry();
                if let Reply::Pong { is_monitoring, .. } = reply {
                    self.record_peer_monitoring(is_monitoring);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Probe failed");
                self.record_handshake(Err(e.to_string()));
                false
            }
        }
    }

    fn spawn_probe(&self) {
        let link = self.clone();
        self.inner.runtime.spawn(async move {
            link.probe().await;
        });
    }

    /// Non-blocking send. Interactive when reachable, otherwise queued for
    /// background transfer. Heart-rate updates are only sent live.
    pub fn send(&self, message: SyncMessage) {
        let kind = message.kind();
        let live_only = matches!(message, SyncMessage::HeartRate { .. });

        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind, error = %e, "Failed to encode message");
                self.inner.stats.record_message_failed();
                return;
            }
        };

        if self.inner.transport.is_reachable() {
            let link = self.clone();
            self.inner.runtime.spawn(async move {
                match link.inner.transport.send(payload).await {
                    Ok(()) => {
                        link.inner.stats.record_message_sent();
                        debug!(kind, "Message sent");
                    }
                    Err(e) => {
                        link.inner.stats.record_message_failed();
                        warn!(kind, error = %e, "Failed to send message");
                    }
                }
            });
            return;
        }

        if live_only {
            debug!(kind, "Peer not reachable, dropping live update");
            return;
        }

        match self.inner.transport.transfer(payload) {
            Ok(()) => {
                self.inner.stats.record_message_queued();
                debug!(kind, "Message queued for transfer");
            }
            Err(e) => {
                self.inner.stats.record_message_failed();
                warn!(kind, error = %e, "Failed to queue message");
                if e == TransportError::NotActivated {
                    self.activate();
                }
            }
        }
    }

    /// Full event list held by the peer.
    pub async fn request_events(&self) -> Result<Vec<DetectionEvent>, SyncError> {
        match self.request(SyncMessage::EventsRequest).await? {
            Reply::Events { data } => Ok(serde_json::from_slice(&data)?),
            other => Err(unexpected("eventsRequest", &other)),
        }
    }

    pub async fn request_settings(&self) -> Result<Settings, SyncError> {
        match self.request(SyncMessage::SettingsRequest).await? {
            Reply::Settings { data } => Ok(serde_json::from_slice(&data)?),
            other => Err(unexpected("settingsRequest", &other)),
        }
    }

    /// Whether the peer is monitoring.
    pub async fn request_status(&self) -> Result<bool, SyncError> {
        match self.request(SyncMessage::StatusRequest).await? {
            Reply::Status { is_monitoring } => {
                self.record_peer_monitoring(is_monitoring);
                Ok(is_monitoring)
            }
            other => Err(unexpected("statusRequest", &other)),
        }
    }

    pub async fn request_heart_rate(&self) -> Result<Option<HeartRatePayload>, SyncError> {
        match self.request(SyncMessage::HeartRateRequest).await? {
            Reply::HeartRate { payload } => {
                if let Some(payload) = payload {
                    self.record_peer_heart_rate(payload);
                }
                Ok(payload)
            }
            other => Err(unexpected("heartRateRequest", &other)),
        }
    }

    pub fn record_peer_heart_rate(&self, payload: HeartRatePayload) {
        self.inner.status.lock().peer_heart_rate = Some(payload);
    }

    pub fn record_peer_monitoring(&self, is_monitoring: bool) {
        self.inner.status.lock().peer_is_monitoring = is_monitoring;
    }

    async fn request(&self, message: SyncMessage) -> Result<Reply, SyncError> {
        if !self.inner.transport.is_reachable() {
            return Err(SyncError::Unreachable);
        }
        self.exchange(&message).await
    }

    async fn exchange(&self, message: &SyncMessage) -> Result<Reply, SyncError> {
        let payload = message.to_bytes().map_err(|source| SyncError::Encode {
            kind: message.kind(),
            source,
        })?;

        let reply = match self.inner.transport.request(payload).await {
            Ok(reply) => reply,
            Err(e) => {
                self.inner.stats.record_message_failed();
                return Err(e.into());
            }
        };
        self.inner.stats.record_message_sent();

        Ok(Reply::from_bytes(&reply)?)
    }

    fn push_latest_heart_rate(&self) {
        if self.inner.role != Role::Wearable {
            return;
        }
        if let Some(latest) = self.inner.local.latest_heart_rate() {
            self.send(SyncMessage::HeartRate {
                bpm: latest.bpm,
                timestamp: latest.timestamp,
            });
        }
    }

    /// Re-read the transport into the link state. Returns reachability.
    fn refresh_state(&self) -> bool {
        let activated = self.inner.transport.activation_state() == ActivationState::Activated;
        let reachable = self.inner.transport.is_reachable();

        let mut status = self.inner.status.lock();
        status.last_status_check = Some(Utc::now());
        if activated {
            status.state = LinkState::Activated { reachable };
        }
        reachable
    }

    fn record_handshake(&self, outcome: Result<(), String>) {
        let mut status = self.inner.status.lock();
        status.last_status_check = Some(Utc::now());
        match outcome {
            Ok(()) => {
                status.last_handshake_succeeded = Some(true);
                status.last_handshake_error = None;
            }
            Err(reason) => {
                status.last_handshake_succeeded = Some(false);
                status.last_handshake_error = Some(reason);
            }
        }
    }
}

impl SyncOutbox for PeerLink {
    fn settings_changed(&self, settings: &Settings) {
        match SyncMessage::settings(settings) {
            Ok(message) => self.send(message),
            Err(e) => error!(error = %e, "Failed to encode settings"),
        }
    }

    fn events_changed(&self, events: &[DetectionEvent]) {
        match SyncMessage::events(events) {
            Ok(message) => self.send(message),
            Err(e) => error!(error = %e, "Failed to encode events"),
        }
    }

    fn heart_rate_observed(&self, bpm: f64, at: DateTime<Utc>) {
        self.send(SyncMessage::HeartRate { bpm, timestamp: at });
    }

    fn monitoring_changed(&self, is_monitoring: bool) {
        self.send(SyncMessage::StatusUpdate { is_monitoring });
    }
}

fn unexpected(request: &'static str, reply: &Reply) -> SyncError {
    SyncError::UnexpectedReply {
        request,
        reply: format!("{reply:?}"),
    }
}
