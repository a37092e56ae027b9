//! The platform link between the two devices.
//!
//! A transport moves opaque payloads. It offers an interactive channel
//! (only while the peer is reachable) and a store-and-forward queue, and
//! reports what happens on its side as [`TransportEvent`]s on a channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Platform activation state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationState {
    NotActivated,
    Inactive,
    Activated,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::NotActivated => "notActivated",
            ActivationState::Inactive => "inactive",
            ActivationState::Activated => "activated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Link not activated")]
    NotActivated,
    #[error("Peer not reachable")]
    NotReachable,
    #[error("No reply from peer")]
    NoReply,
    #[error("Request timed out")]
    Timeout,
    #[error("Link closed")]
    Closed,
    #[error("Activation failed: {0}")]
    Activation(String),
}

/// Stream of delegate callbacks for one endpoint.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Channel on which a received request is answered.
pub type ReplySender = oneshot::Sender<Vec<u8>>;

/// Delegate callbacks from the platform link.
#[derive(Debug)]
pub enum TransportEvent {
    ActivationComplete {
        state: ActivationState,
        error: Option<String>,
    },
    ReachabilityChanged(bool),
    Deactivated,
    MessageReceived {
        payload: Vec<u8>,
        reply: Option<ReplySender>,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Request activation. Completion arrives as
    /// [`TransportEvent::ActivationComplete`].
    fn activate(&self) -> Result<(), TransportError>;

    fn activation_state(&self) -> ActivationState;

    /// Whether the interactive channel is currently usable.
    fn is_reachable(&self) -> bool;

    /// Interactive fire-and-forget send.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Interactive send that waits for the peer's reply.
    async fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Queue for opportunistic background delivery.
    fn transfer(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}
