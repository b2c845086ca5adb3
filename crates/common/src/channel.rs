//! Channel bridge between blocking engine threads and the async transport
//!
//! The engine side is intentionally blocking: PC/SC worker threads park on
//! the bridge while the transport collaborator, which may live on an async
//! runtime, carries messages to and from the privileged peer. Either side
//! closing the bridge tears the channel down for both.

use async_channel::{Receiver, Sender, bounded};
use protocol::{Inbound, RequestEnvelope};

/// Bounded depth of each direction of the bridge.
const BRIDGE_DEPTH: usize = 256;

/// Engine half of the bridge (blocking)
#[derive(Clone)]
pub struct PeerLink {
    request_tx: Sender<RequestEnvelope>,
    inbound_rx: Receiver<Inbound>,
}

impl PeerLink {
    /// Queue a request for the transport; blocks if the bridge is full.
    pub fn send_request(&self, envelope: RequestEnvelope) -> crate::Result<()> {
        self.request_tx
            .send_blocking(envelope)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next inbound message; `Err` once the transport hung up
    /// and the buffer is drained.
    pub fn recv_inbound(&self) -> crate::Result<Inbound> {
        self.inbound_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Tear the bridge down from the engine side.
    pub fn close(&self) {
        self.request_tx.close();
        self.inbound_rx.close();
    }
}

/// Transport half of the bridge
///
/// Async methods for runtime-hosted transports, `_blocking` variants for
/// transports running on plain threads.
#[derive(Clone)]
pub struct TransportEnd {
    request_rx: Receiver<RequestEnvelope>,
    inbound_tx: Sender<Inbound>,
}

impl TransportEnd {
    /// Receive the next outbound request from the engine.
    pub async fn next_request(&self) -> crate::Result<RequestEnvelope> {
        self.request_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Deliver a reply or event to the engine.
    pub async fn send_inbound(&self, inbound: Inbound) -> crate::Result<()> {
        self.inbound_tx
            .send(inbound)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Blocking variant of [`TransportEnd::next_request`].
    pub fn next_request_blocking(&self) -> crate::Result<RequestEnvelope> {
        self.request_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Blocking variant of [`TransportEnd::send_inbound`].
    pub fn send_inbound_blocking(&self, inbound: Inbound) -> crate::Result<()> {
        self.inbound_tx
            .send_blocking(inbound)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Tear the bridge down from the transport side.
    pub fn close(&self) {
        self.request_rx.close();
        self.inbound_tx.close();
    }
}

/// Create the bridge between the engine and the transport collaborator.
///
/// Returns (PeerLink for the engine, TransportEnd for the transport).
pub fn create_peer_bridge() -> (PeerLink, TransportEnd) {
    let (request_tx, request_rx) = bounded(BRIDGE_DEPTH);
    let (inbound_tx, inbound_rx) = bounded(BRIDGE_DEPTH);

    (
        PeerLink {
            request_tx,
            inbound_rx,
        },
        TransportEnd {
            request_rx,
            inbound_tx,
        },
    )
}
