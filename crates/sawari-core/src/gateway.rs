//! Broadcast gateway for the Sawari hub.
//!
//! Thin best-effort fan-out: frames go either to every attached
//! connection or to a single one. There is no queuing and no retry; a
//! detached or lagging recipient simply misses the frame and converges
//! on the next reconciling snapshot.

use dashmap::DashMap;
use sawari_protocol::{ConnectionId, ServerFrame};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

/// Default fan-out channel capacity.
const DEFAULT_FANOUT_CAPACITY: usize = 1024;

/// Fan-out point between the engine and the transport layer.
pub struct Gateway {
    /// All-connections audience.
    fanout: broadcast::Sender<Arc<ServerFrame>>,
    /// Per-connection senders for point-to-point frames.
    direct: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerFrame>>>,
}

impl Gateway {
    /// Create a gateway with the default fan-out capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FANOUT_CAPACITY)
    }

    /// Create a gateway with a specific fan-out capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (fanout, _) = broadcast::channel(capacity);
        Self {
            fanout,
            direct: DashMap::new(),
        }
    }

    /// Register a connection's direct-delivery sender.
    pub fn attach(&self, id: impl Into<ConnectionId>, tx: mpsc::UnboundedSender<Arc<ServerFrame>>) {
        let id = id.into();
        debug!(connection = %id, "Gateway: connection attached");
        self.direct.insert(id, tx);
    }

    /// Drop a connection's direct-delivery sender. Idempotent.
    pub fn detach(&self, id: &str) {
        if self.direct.remove(id).is_some() {
            debug!(connection = %id, "Gateway: connection detached");
        }
    }

    /// Subscribe to the all-connections audience.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerFrame>> {
        self.fanout.subscribe()
    }

    /// Deliver a frame to every attached connection.
    ///
    /// Returns the number of subscribers that received it.
    pub fn broadcast(&self, frame: ServerFrame) -> usize {
        trace!(frame = ?frame, "Gateway: broadcast");
        self.fanout.send(Arc::new(frame)).unwrap_or_default()
    }

    /// Deliver a frame to a single connection.
    ///
    /// Returns `false` if the connection is not attached or its channel
    /// is closed; the frame is dropped either way.
    pub fn send_to(&self, id: &str, frame: ServerFrame) -> bool {
        match self.direct.get(id) {
            Some(tx) => tx.send(Arc::new(frame)).is_ok(),
            None => {
                trace!(connection = %id, "Gateway: direct send to detached connection");
                false
            }
        }
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.direct.len()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_all_subscribers() {
        let gateway = Gateway::new();
        let mut rx1 = gateway.subscribe();
        let mut rx2 = gateway.subscribe();

        let count = gateway.broadcast(ServerFrame::stop_request("conn-1"));
        assert_eq!(count, 2);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let gateway = Gateway::new();
        assert_eq!(gateway.broadcast(ServerFrame::stop_request("conn-1")), 0);
    }

    #[tokio::test]
    async fn test_direct_send() {
        let gateway = Gateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.attach("conn-1", tx);

        assert!(gateway.send_to("conn-1", ServerFrame::AssignNumber { number: 7 }));
        let frame = rx.recv().await.unwrap();
        assert_eq!(*frame, ServerFrame::AssignNumber { number: 7 });

        assert!(!gateway.send_to("conn-2", ServerFrame::AssignNumber { number: 8 }));
    }

    #[tokio::test]
    async fn test_detach_drops_delivery() {
        let gateway = Gateway::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        gateway.attach("conn-1", tx);
        assert_eq!(gateway.connection_count(), 1);

        gateway.detach("conn-1");
        gateway.detach("conn-1");
        assert_eq!(gateway.connection_count(), 0);
        assert!(!gateway.send_to("conn-1", ServerFrame::AssignNumber { number: 1 }));
    }
}
