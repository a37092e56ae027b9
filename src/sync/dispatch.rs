//! Drives the link and handler from the transport's event stream.

use super::handler::SyncHandler;
use super::link::PeerLink;
use super::transport::{EventReceiver, TransportEvent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Consume transport events until the transport drops its sender.
pub fn spawn_dispatch(
    mut events: EventReceiver,
    link: PeerLink,
    handler: Arc<SyncHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::ActivationComplete { state, error } => {
                    link.on_activation_complete(state, error);
                }
                TransportEvent::ReachabilityChanged(reachable) => {
                    link.on_reachability_changed(reachable);
                }
                TransportEvent::Deactivated => link.on_deactivated(),
                TransportEvent::MessageReceived { payload, reply } => {
                    handler.handle(&payload, reply);
                }
            }
        }
        debug!(role = %link.role(), "Transport event stream closed");
    })
}
