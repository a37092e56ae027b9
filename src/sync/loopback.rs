//! In-memory transport connecting two endpoints in one process.
//!
//! Used by the simulator and the tests. Reachability is a switch shared by
//! both endpoints; the link is reachable when the switch is on and both
//! sides are activated. Transfers queued while unreachable are flushed when
//! the link becomes reachable.

use super::transport::{ActivationState, EventReceiver, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Shared {
    reachable: AtomicBool,
    activation: [Mutex<ActivationState>; 2],
    activation_failure: [Mutex<Option<String>>; 2],
    pending: [Mutex<Vec<Vec<u8>>>; 2],
    events: [mpsc::UnboundedSender<TransportEvent>; 2],
}

impl Shared {
    fn is_activated(&self, side: usize) -> bool {
        *self.activation[side].lock() == ActivationState::Activated
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst) && self.is_activated(0) && self.is_activated(1)
    }

    fn emit(&self, side: usize, event: TransportEvent) {
        if self.events[side].send(event).is_err() {
            debug!(side, "Transport event dropped, receiver closed");
        }
    }

    fn deliver(&self, to: usize, payload: Vec<u8>) -> Result<(), TransportError> {
        self.events[to]
            .send(TransportEvent::MessageReceived {
                payload,
                reply: None,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn flush_pending(&self) {
        for side in 0..2 {
            let queued: Vec<Vec<u8>> = std::mem::take(&mut *self.pending[side].lock());
            for payload in queued {
                if self.deliver(1 - side, payload).is_err() {
                    debug!(side, "Queued transfer dropped, peer closed");
                }
            }
        }
    }
}

/// One end of an in-memory link.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    side: usize,
    request_timeout: Duration,
}

impl LoopbackTransport {
    /// Two connected endpoints, each with its own event stream. The link
    /// starts reachable; neither side is activated.
    pub fn pair() -> ((Self, EventReceiver), (Self, EventReceiver)) {
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (second_tx, second_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            reachable: AtomicBool::new(true),
            activation: [
                Mutex::new(ActivationState::NotActivated),
                Mutex::new(ActivationState::NotActivated),
            ],
            activation_failure: [Mutex::new(None), Mutex::new(None)],
            pending: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            events: [first_tx, second_tx],
        });

        let endpoint = |side| Self {
            shared: shared.clone(),
            side,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };

        ((endpoint(0), first_rx), (endpoint(1), second_rx))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    /// Flip the shared reachability switch. Both activated sides are told
    /// when the effective reachability changes.
    pub fn set_reachable(&self, reachable: bool) {
        let was = self.shared.is_reachable();
        self.shared.reachable.store(reachable, Ordering::SeqCst);
        let now = self.shared.is_reachable();

        if was == now {
            return;
        }
        if now {
            self.shared.flush_pending();
        }
        for side in 0..2 {
            if self.shared.is_activated(side) {
                self.shared.emit(side, TransportEvent::ReachabilityChanged(now));
            }
        }
    }

    /// Make the next activation of this side complete with `reason`.
    pub fn fail_next_activation(&self, reason: impl Into<String>) {
        *self.shared.activation_failure[self.side].lock() = Some(reason.into());
    }

    /// Simulate the platform deactivating this side.
    pub fn deactivate(&self) {
        let was_reachable = self.shared.is_reachable();
        *self.shared.activation[self.side].lock() = ActivationState::Inactive;
        self.shared.emit(self.side, TransportEvent::Deactivated);

        if was_reachable && self.shared.is_activated(self.peer()) {
            self.shared.emit(self.peer(), TransportEvent::ReachabilityChanged(false));
        }
    }

    /// Transfers queued on this side awaiting delivery.
    pub fn pending_transfers(&self) -> usize {
        self.shared.pending[self.side].lock().len()
    }

    fn ensure_reachable(&self) -> Result<(), TransportError> {
        if !self.shared.is_activated(self.side) {
            return Err(TransportError::NotActivated);
        }
        if !self.shared.is_reachable() {
            return Err(TransportError::NotReachable);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn activate(&self) -> Result<(), TransportError> {
        let was_reachable = self.shared.is_reachable();
        {
            let mut state = self.shared.activation[self.side].lock();
            if *state == ActivationState::Activated {
                return Ok(());
            }

            if let Some(reason) = self.shared.activation_failure[self.side].lock().take() {
                *state = ActivationState::NotActivated;
                drop(state);
                self.shared.emit(
                    self.side,
                    TransportEvent::ActivationComplete {
                        state: ActivationState::NotActivated,
                        error: Some(reason),
                    },
                );
                return Ok(());
            }

            *state = ActivationState::Activated;
        }

        self.shared.emit(
            self.side,
            TransportEvent::ActivationComplete {
                state: ActivationState::Activated,
                error: None,
            },
        );

        if !was_reachable && self.shared.is_reachable() {
            self.shared.flush_pending();
            self.shared.emit(self.peer(), TransportEvent::ReachabilityChanged(true));
        }
        Ok(())
    }

    fn activation_state(&self) -> ActivationState {
        *self.shared.activation[self.side].lock()
    }

    fn is_reachable(&self) -> bool {
        self.shared.is_reachable()
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_reachable()?;
        self.shared.deliver(self.peer(), payload)
    }

    async fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.ensure_reachable()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.events[self.peer()]
            .send(TransportEvent::MessageReceived {
                payload,
                reply: Some(reply_tx),
            })
            .map_err(|_| TransportError::Closed)?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::NoReply),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn transfer(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.shared.is_activated(self.side) {
            return Err(TransportError::NotActivated);
        }
        if self.shared.is_reachable() {
            return self.shared.deliver(self.peer(), payload);
        }
        self.shared.pending[self.side].lock().push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_now(rx: &mut EventReceiver) -> Option<TransportEvent> {
        rx.try_recv().ok()
    }

    #[tokio::test]
    async fn test_activation_and_reachability() {
        let ((a, mut a_rx), (b, mut b_rx)) = LoopbackTransport::pair();
        assert!(!a.is_reachable());

        a.activate().unwrap();
        assert!(matches!(
            next_now(&mut a_rx),
            Some(TransportEvent::ActivationComplete {
                state: ActivationState::Activated,
                error: None
            })
        ));
        assert!(!a.is_reachable());

        b.activate().unwrap();
        assert!(b.is_reachable());
        assert!(matches!(next_now(&mut b_rx), Some(TransportEvent::ActivationComplete { .. })));
        assert!(matches!(next_now(&mut a_rx), Some(TransportEvent::ReachabilityChanged(true))));

        b.set_reachable(false);
        assert!(matches!(next_now(&mut a_rx), Some(TransportEvent::ReachabilityChanged(false))));
        assert!(matches!(next_now(&mut b_rx), Some(TransportEvent::ReachabilityChanged(false))));
    }

    #[tokio::test]
    async fn test_send_requires_reachability() {
        let ((a, _a_rx), (b, mut b_rx)) = LoopbackTransport::pair();
        assert_eq!(a.send(b"x".to_vec()).await, Err(TransportError::NotActivated));

        a.activate().unwrap();
        assert_eq!(a.send(b"x".to_vec()).await, Err(TransportError::NotReachable));

        b.activate().unwrap();
        let _ = next_now(&mut b_rx);
        a.send(b"hello".to_vec()).await.unwrap();
        match next_now(&mut b_rx) {
            Some(TransportEvent::MessageReceived { payload, reply }) => {
                assert_eq!(payload, b"hello");
                assert!(reply.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transfer_queued_until_reachable() {
        let ((a, _a_rx), (b, mut b_rx)) = LoopbackTransport::pair();
        a.activate().unwrap();
        b.activate().unwrap();
        a.set_reachable(false);
        while next_now(&mut b_rx).is_some() {}

        a.transfer(b"queued".to_vec()).unwrap();
        assert_eq!(a.pending_transfers(), 1);
        assert!(next_now(&mut b_rx).is_none());

        a.set_reachable(true);
        assert_eq!(a.pending_transfers(), 0);
        assert!(matches!(
            next_now(&mut b_rx),
            Some(TransportEvent::MessageReceived { reply: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let ((a, _a_rx), (b, mut b_rx)) = LoopbackTransport::pair();
        a.activate().unwrap();
        b.activate().unwrap();
        let _ = next_now(&mut b_rx);

        let responder = tokio::spawn(async move {
            if let Some(TransportEvent::MessageReceived {
                reply: Some(reply), ..
            }) = b_rx.recv().await
            {
                let _ = reply.send(b"pong".to_vec());
            }
        });

        assert_eq!(a.request(b"ping".to_vec()).await.unwrap(), b"pong");
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let ((a, _a_rx), (b, _b_rx)) = LoopbackTransport::pair();
        let a = a.with_request_timeout(Duration::from_secs(3));
        a.activate().unwrap();
        b.activate().unwrap();

        // Nobody answers; the receiver holds the reply sender
        assert_eq!(a.request(b"ping".to_vec()).await, Err(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_failed_activation() {
        let ((a, mut a_rx), _) = LoopbackTransport::pair();
        a.fail_next_activation("not paired");
        a.activate().unwrap();

        assert!(matches!(
            next_now(&mut a_rx),
            Some(TransportEvent::ActivationComplete {
                state: ActivationState::NotActivated,
                error: Some(_)
            })
        ));
        assert_eq!(a.activation_state(), ActivationState::NotActivated);
    }
}
