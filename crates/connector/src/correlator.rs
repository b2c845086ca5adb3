//! Request/reply correlation
//!
//! Turns the peer's asynchronous, possibly out-of-order replies into
//! synchronous-looking calls: a worker thread queues a request, then parks
//! on a single-fulfillment slot until the dispatch thread completes it or
//! the channel tears down. The pending table is the only synchronization
//! point for channel-level state; its mutex is never held while a waiter
//! is woken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use common::PeerLink;
use protocol::{Reply, ReplyPayload, Request, RequestEnvelope, RequestId};
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Slot = SyncSender<Result<ReplyPayload>>;

pub struct Correlator {
    link: PeerLink,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Slot>>,
    closed: AtomicBool,
}

/// A request waiting for its reply
///
/// Must be waited on; `wait_timeout` abandons the slot on expiry so a late
/// reply is dropped instead of delivered to a caller that already returned.
pub struct PendingReply<'a> {
    correlator: &'a Correlator,
    id: RequestId,
    rx: Receiver<Result<ReplyPayload>>,
}

impl Correlator {
    pub fn new(link: PeerLink) -> Self {
        Self {
            link,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a request and register its reply slot
    pub fn send(&self, request: Request) -> Result<PendingReply<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        let id = self.allocate_id();
        let (tx, rx) = sync_channel(1);
        self.table().insert(id, tx);
        if let Err(e) = self.link.send_request(RequestEnvelope { id, request }) {
            // lost the race against teardown
            self.table().remove(&id);
            debug!("request {} not sent: {e}", id.0);
            return Err(Error::ChannelClosed);
        }
        Ok(PendingReply {
            correlator: self,
            id,
            rx,
        })
    }

    /// Queue a request that expects no reply (cancellation)
    pub fn post(&self, request: Request) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        let id = self.allocate_id();
        self.link
            .send_request(RequestEnvelope { id, request })
            .map_err(|_| Error::ChannelClosed)
    }

    /// Deliver a reply from the dispatch thread
    ///
    /// An unknown id means the peer double-completed, answered after a
    /// timeout, or invented an id; the reply is dropped either way.
    pub fn complete(&self, reply: Reply) {
        let slot = self.table().remove(&reply.id);
        let Some(slot) = slot else {
            warn!("dropping reply for unknown request {}", reply.id.0);
            return;
        };
        // Fulfill outside the table lock; the waiter may already be gone.
        let _ = slot.send(reply.result.map_err(Error::Peer));
    }

    /// Fail every outstanding request with `ChannelClosed` and refuse new ones
    pub fn cancel_all(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<(RequestId, Slot)> = self.table().drain().collect();
        for (id, slot) in drained {
            debug!("cancelling outstanding request {}", id.0);
            let _ = slot.send(Err(Error::ChannelClosed));
        }
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn forget(&self, id: RequestId) {
        self.table().remove(&id);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RequestId, Slot>> {
        self.pending.lock().expect("correlator mutex poisoned")
    }
}

impl PendingReply<'_> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Block until the peer replies or the channel closes
    pub fn wait(self) -> Result<ReplyPayload> {
        match self.rx.recv() {
            Ok(result) => result,
            // slot dropped without fulfillment: teardown raced us
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Block with a deadline
    ///
    /// On expiry the slot is abandoned, so the correlator's unknown-id rule
    /// discards whatever arrives later.
    pub fn wait_timeout(self, timeout: Duration) -> Result<ReplyPayload> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.correlator.forget(self.id);
                Err(Error::TransferTimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_peer_bridge;
    use protocol::DeviceId;

    fn reply_ok(id: RequestId) -> Reply {
        Reply {
            id,
            result: Ok(ReplyPayload::Devices {
                devices: Vec::new(),
            }),
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        let a = correlator.send(Request::ListDevices).unwrap();
        let b = correlator.send(Request::ListDevices).unwrap();
        assert!(b.id().0 > a.id().0);
    }

    #[test]
    fn reply_reaches_waiter() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        let pending = correlator.send(Request::ListDevices).unwrap();
        correlator.complete(reply_ok(pending.id()));
        assert!(matches!(
            pending.wait(),
            Ok(ReplyPayload::Devices { .. })
        ));
    }

    #[test]
    fn unknown_id_is_dropped() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        // no pending request with this id; must not panic or corrupt state
        correlator.complete(reply_ok(RequestId(999)));

        let pending = correlator.send(Request::ListDevices).unwrap();
        correlator.complete(reply_ok(pending.id()));
        assert!(pending.wait().is_ok());
    }

    #[test]
    fn double_complete_leaves_other_requests_intact() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        let first = correlator.send(Request::ListDevices).unwrap();
        let second = correlator.send(Request::ListDevices).unwrap();

        correlator.complete(reply_ok(first.id()));
        // second completion of the same id is a protocol violation, dropped
        correlator.complete(reply_ok(first.id()));
        correlator.complete(reply_ok(second.id()));

        assert!(first.wait().is_ok());
        assert!(second.wait().is_ok());
    }

    #[test]
    fn cancel_all_unblocks_waiters() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        std::thread::scope(|scope| {
            let pending = correlator.send(Request::ListDevices).unwrap();
            let waiter = scope.spawn(move || pending.wait());

            correlator.cancel_all();
            assert_eq!(waiter.join().unwrap(), Err(Error::ChannelClosed));
        });

        assert_eq!(
            correlator.send(Request::ListDevices).map(|_| ()),
            Err(Error::ChannelClosed)
        );
    }

    #[test]
    fn transport_hangup_fails_send() {
        let (link, transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        transport.close();
        assert_eq!(
            correlator.send(Request::ListDevices).map(|_| ()),
            Err(Error::ChannelClosed)
        );
    }

    #[test]
    fn timeout_abandons_slot() {
        let (link, _transport) = create_peer_bridge();
        let correlator = Correlator::new(link);

        let pending = correlator
            .send(Request::GetConfigurations {
                device_id: DeviceId(1),
            })
            .unwrap();
        let id = pending.id();
        assert_eq!(
            pending.wait_timeout(Duration::from_millis(10)),
            Err(Error::TransferTimedOut)
        );

        // the late reply hits the unknown-id rule and is dropped
        correlator.complete(reply_ok(id));

        let next = correlator.send(Request::ListDevices).unwrap();
        correlator.complete(reply_ok(next.id()));
        assert!(next.wait().is_ok());
    }
}
