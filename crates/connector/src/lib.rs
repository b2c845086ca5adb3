//! Smart-card connector engine
//!
//! A sandboxed process with no hardware access uses this crate to offer a
//! PC/SC service (establish/release context, list readers, connect,
//! transmit) by delegating all USB I/O to a privileged peer over an
//! asynchronous message channel. Three layers make the delegation
//! transparent:
//!
//! - [`correlator::Correlator`] matches the peer's out-of-order replies to
//!   blocked worker threads,
//! - [`usb::UsbDeviceProxy`] exposes a synchronous-looking USB surface and
//!   enforces USB semantics locally,
//! - [`pcsc::ScardManager`] implements the PC/SC call and handle rules on
//!   top of the proxy.
//!
//! The transport collaborator drives the [`common::TransportEnd`] half of
//! the bridge; the provider adapter calls into the manager from dedicated
//! worker threads, one per in-flight PC/SC entry point.
//!
//! # Example
//!
//! ```
//! use connector::{Connector, ConnectorConfig, Error};
//!
//! let (engine, _transport) = Connector::new(ConnectorConfig::default());
//! let context = engine.manager().establish_context().unwrap();
//! // peer not ready yet: reader operations fail fast
//! assert_eq!(engine.manager().list_readers(context), Err(Error::NotReady));
//! engine.manager().release_context(context).unwrap();
//! ```

pub mod config;
pub mod correlator;
pub mod error;
pub mod pcsc;
pub mod readiness;
pub mod usb;

pub use config::ConnectorConfig;
pub use error::{Error, Result};
pub use pcsc::{CardHandle, ContextHandle, Disposition, ScardManager};
pub use readiness::ReadinessFlag;
pub use usb::{InterfaceClaim, UsbDeviceProxy};

use std::sync::Arc;
use std::thread::JoinHandle;

use common::{PeerLink, TransportEnd, create_peer_bridge};
use correlator::Correlator;
use protocol::{Event, Inbound};
use tracing::debug;

/// The assembled engine
///
/// Owns the correlator, USB proxy, and PC/SC manager, plus the dispatch
/// thread that drains inbound peer messages. Dropping the engine (or the
/// transport hanging up) tears everything down: outstanding requests are
/// cancelled and every context and card handle reaches its terminal state.
pub struct Connector {
    manager: Arc<ScardManager>,
    proxy: Arc<UsbDeviceProxy>,
    correlator: Arc<Correlator>,
    readiness: ReadinessFlag,
    link: PeerLink,
    dispatch: Option<JoinHandle<()>>,
}

impl Connector {
    /// Build the engine and hand back the transport half of the bridge
    pub fn new(config: ConnectorConfig) -> (Self, TransportEnd) {
        let (link, transport) = create_peer_bridge();
        let correlator = Arc::new(Correlator::new(link.clone()));
        let proxy = Arc::new(UsbDeviceProxy::new(Arc::clone(&correlator)));
        let readiness = ReadinessFlag::new();
        let manager = Arc::new(ScardManager::new(
            Arc::clone(&proxy),
            readiness.clone(),
            &config,
        ));
        let dispatch = spawn_dispatch(
            link.clone(),
            Arc::clone(&correlator),
            Arc::clone(&proxy),
            Arc::clone(&manager),
        );
        (
            Self {
                manager,
                proxy,
                correlator,
                readiness,
                link,
                dispatch: Some(dispatch),
            },
            transport,
        )
    }

    /// The PC/SC surface the provider adapter calls into
    pub fn manager(&self) -> &ScardManager {
        &self.manager
    }

    /// The USB proxy beneath the PC/SC layer
    pub fn proxy(&self) -> &UsbDeviceProxy {
        &self.proxy
    }

    /// Consume the external "peer is ready" signal
    pub fn mark_ready(&self) {
        self.readiness.signal();
    }

    /// Tear the channel down
    ///
    /// Cancels every outstanding request, invalidates devices and claims,
    /// and moves all contexts and cards to their terminal states. Safe to
    /// call from any thread, including while workers are blocked in calls;
    /// it never waits for them. Idempotent.
    pub fn shutdown(&self) {
        self.link.close();
        self.correlator.cancel_all();
        self.proxy.channel_closed();
        self.manager.channel_closed();
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.dispatch.take() {
            let _ = handle.join();
        }
    }
}

/// Drain inbound peer messages on a dedicated thread
///
/// The channel delivers serialized; this thread is the only reader, so
/// replies and events are applied exactly once and in order. When the
/// channel closes from either side the thread runs full teardown.
fn spawn_dispatch(
    link: PeerLink,
    correlator: Arc<Correlator>,
    proxy: Arc<UsbDeviceProxy>,
    manager: Arc<ScardManager>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("peer-dispatch".to_string())
        .spawn(move || {
            loop {
                match link.recv_inbound() {
                    Ok(Inbound::Reply(reply)) => correlator.complete(reply),
                    Ok(Inbound::Event(Event::DeviceArrived { device })) => {
                        proxy.device_arrived(device)
                    }
                    Ok(Inbound::Event(Event::DeviceLeft { device_id })) => {
                        proxy.device_left(device_id)
                    }
                    Err(_) => break,
                }
            }
            debug!("inbound channel closed, tearing down");
            correlator.cancel_all();
            proxy.channel_closed();
            manager.channel_closed();
        })
        .expect("failed to spawn peer-dispatch thread")
}
