//! Peer synchronization between the wearable and its companion.
//!
//! The [`Transport`] trait stands in for the platform link. [`PeerLink`]
//! owns the link state machine and outgoing traffic, [`SyncHandler`]
//! applies what the peer sends, and [`spawn_dispatch`] feeds transport
//! callbacks to both.

pub mod dispatch;
pub mod handler;
pub mod link;
pub mod loopback;
pub mod message;
pub mod transport;

pub use dispatch::spawn_dispatch;
pub use handler::SyncHandler;
pub use link::{LinkConfig, LinkState, LinkStatus, PeerLink, SyncError};
pub use loopback::LoopbackTransport;
pub use message::{HeartRatePayload, Reply, SyncMessage};
pub use transport::{
    ActivationState, EventReceiver, ReplySender, Transport, TransportError, TransportEvent,
};
