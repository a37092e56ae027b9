//! Composition root for one side of the link.
//!
//! Builds the stores, the monitor and the sync services from a [`Config`]
//! and wires the stores' outboxes to the peer link. Nothing in the crate
//! is global; everything is reached through a [`Device`].

use crate::alert::AlertSink;
use crate::config::{Config, ConfigError, Role};
use crate::core::{DetectionEngine, MovementFilter};
use crate::monitor::{LocalStatus, Monitor};
use crate::stats::SharedStats;
use crate::store::{
    EventLimits, EventStore, KeyValueStore, SessionHistory, SettingsStore, StoreError, SyncOutbox,
};
use crate::sync::{
    spawn_dispatch, EventReceiver, LinkConfig, PeerLink, SyncError, SyncHandler, Transport,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Platform collaborators a device is assembled from.
pub struct Platform {
    pub kv: Arc<dyn KeyValueStore>,
    pub transport: Arc<dyn Transport>,
    pub transport_events: EventReceiver,
    pub alerts: Arc<dyn AlertSink>,
    pub stats: SharedStats,
}

pub struct Device {
    role: Role,
    pub events: Arc<EventStore>,
    pub settings: Arc<SettingsStore>,
    pub sessions: Arc<SessionHistory>,
    pub monitor: Arc<Monitor>,
    pub link: PeerLink,
    pub handler: Arc<SyncHandler>,
    pub stats: SharedStats,
    dispatch: JoinHandle<()>,
}

impl Device {
    /// Must be called inside a tokio runtime.
    pub fn assemble(config: &Config, platform: Platform) -> Result<Self, DeviceError> {
        let Platform {
            kv,
            transport,
            transport_events,
            alerts,
            stats,
        } = platform;

        let limits = EventLimits::from(&config.storage);
        let events = Arc::new(EventStore::open(kv.clone(), limits)?);
        let settings = Arc::new(SettingsStore::open(kv.clone())?);
        let sessions = Arc::new(SessionHistory::open(kv)?);
        let local = Arc::new(LocalStatus::default());

        let link = PeerLink::new(
            transport,
            LinkConfig::from(&config.sync),
            config.role,
            local.clone(),
            stats.clone(),
        )?;

        let fallback_recency = chrono::Duration::from_std(config.sync.fallback_recency)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let handler = Arc::new(SyncHandler::new(
            config.role,
            link.clone(),
            events.clone(),
            settings.clone(),
            local.clone(),
            alerts.clone(),
            stats.clone(),
            fallback_recency,
        ));

        let engine = DetectionEngine::new(config.detection_params(), config.zone()?);
        let monitor = Arc::new(Monitor::new(
            engine,
            MovementFilter::new(config.movement.threshold_g),
            events.clone(),
            settings.clone(),
            sessions.clone(),
            alerts,
            local,
            stats.clone(),
        ));

        let outbox: Arc<dyn SyncOutbox> = Arc::new(link.clone());
        events.set_outbox(outbox.clone());
        settings.set_outbox(outbox.clone());
        monitor.set_outbox(outbox);

        let dispatch = spawn_dispatch(transport_events, link.clone(), handler.clone());
        info!(role = %config.role, events = events.len(), "Device assembled");

        Ok(Self {
            role: config.role,
            events,
            settings,
            sessions,
            monitor,
            link,
            handler,
            stats,
            dispatch,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Request link activation; progress is reported through the link.
    pub fn connect(&self) {
        self.link.activate();
    }

    /// Stop background sync work.
    pub fn shutdown(self) {
        self.link.stop_activation_retry();
        self.dispatch.abort();
        info!(role = %self.role, "Device shut down");
    }
}
