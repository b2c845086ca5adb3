//! USB device proxy
//!
//! A synchronous-looking USB access surface routed through the correlator.
//! Every operation may block the calling worker thread until the peer
//! replies or the channel closes. USB semantics (claim exclusivity,
//! endpoint direction and type, cancellation) are enforced locally, so an
//! invalid transfer never reaches the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use protocol::{
    ConfigurationDescriptor, DeviceId, DeviceInfo, EndpointDescriptor, PeerError, ReplyPayload,
    Request, TransferKind, TransferPayload, descriptors,
};
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::usb::devices::DeviceRegistry;

/// Token for one claimed interface
///
/// Plain data, deliberately not RAII: release goes through
/// [`UsbDeviceProxy::release_interface`] and is idempotent.
#[derive(Debug, Clone)]
pub struct InterfaceClaim {
    device_id: DeviceId,
    interface_number: u8,
}

impl InterfaceClaim {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }
}

struct ClaimState {
    endpoints: Vec<EndpointDescriptor>,
}

pub struct UsbDeviceProxy {
    correlator: Arc<Correlator>,
    registry: DeviceRegistry,
    claims: Mutex<HashMap<(DeviceId, u8), ClaimState>>,
}

impl UsbDeviceProxy {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self {
            correlator,
            registry: DeviceRegistry::new(),
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Request a fresh device snapshot from the peer; never cached
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        match self.correlator.send(Request::ListDevices)?.wait()? {
            ReplyPayload::Devices { devices } => {
                self.registry.apply_snapshot(&devices);
                Ok(devices)
            }
            other => Err(protocol_violation("ListDevices", &other)),
        }
    }

    /// Fetch and validate the configuration descriptors of one device
    pub fn configuration_descriptors(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<ConfigurationDescriptor>> {
        self.ensure_attached(device_id)?;
        let reply = self
            .correlator
            .send(Request::GetConfigurations { device_id })?
            .wait();
        match reply {
            Ok(ReplyPayload::Configurations { configurations }) => configurations
                .into_iter()
                .map(|raw| descriptors::validate_configuration(raw).map_err(Error::from))
                .collect(),
            Ok(other) => Err(protocol_violation("GetConfigurations", &other)),
            Err(Error::Peer(PeerError::NotFound | PeerError::NoDevice)) => {
                Err(Error::DeviceNotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// The device's active configuration
    pub fn active_configuration(&self, device_id: DeviceId) -> Result<ConfigurationDescriptor> {
        self.configuration_descriptors(device_id)?
            .into_iter()
            .find(|config| config.active)
            .ok_or(Error::MalformedDescriptor(
                protocol::DescriptorError::NoActiveConfiguration,
            ))
    }

    /// Claim an interface for exclusive use
    ///
    /// At most one live claim per (device, interface); a second attempt
    /// fails with `InterfaceBusy` until the first is released.
    pub fn claim_interface(
        &self,
        device_id: DeviceId,
        interface_number: u8,
    ) -> Result<InterfaceClaim> {
        self.ensure_attached(device_id)?;
        let key = (device_id, interface_number);
        if self.claim_table().contains_key(&key) {
            return Err(Error::InterfaceBusy);
        }

        // Endpoint set for later transfer validation; fetched before the
        // claim so a malformed descriptor fails the whole operation.
        let config = self.active_configuration(device_id)?;
        let endpoints = config
            .interfaces
            .iter()
            .find(|iface| iface.interface_number == interface_number)
            .map(|iface| iface.endpoints.clone())
            .ok_or(Error::DeviceNotFound)?;

        // Reserve the slot before contacting the peer so concurrent claims
        // of the same interface resolve to a single local winner.
        {
            let mut claims = self.claim_table();
            if claims.contains_key(&key) {
                return Err(Error::InterfaceBusy);
            }
            claims.insert(key, ClaimState { endpoints });
        }

        let reply = match self.correlator.send(Request::ClaimInterface {
            device_id,
            interface_number,
        }) {
            Ok(pending) => pending.wait(),
            Err(e) => Err(e),
        };
        match reply {
            Ok(ReplyPayload::InterfaceClaimed) => {
                debug!("claimed interface {interface_number} on device {}", device_id.0);
                Ok(InterfaceClaim {
                    device_id,
                    interface_number,
                })
            }
            failed => {
                self.claim_table().remove(&key);
                match failed {
                    Ok(other) => Err(protocol_violation("ClaimInterface", &other)),
                    Err(Error::Peer(PeerError::NotFound | PeerError::NoDevice)) => {
                        Err(Error::DeviceNotFound)
                    }
                    Err(Error::Peer(PeerError::Busy | PeerError::Access)) => {
                        Err(Error::InterfaceBusy)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Release a claimed interface; a no-op if it is already released
    pub fn release_interface(&self, claim: &InterfaceClaim) -> Result<()> {
        let key = (claim.device_id, claim.interface_number);
        if self.claim_table().remove(&key).is_none() {
            debug!(
                "interface {} on device {} already released",
                claim.interface_number, claim.device_id.0
            );
            return Ok(());
        }

        let reply = self
            .correlator
            .send(Request::ReleaseInterface {
                device_id: claim.device_id,
                interface_number: claim.interface_number,
            })?
            .wait();
        match reply {
            Ok(ReplyPayload::InterfaceReleased) => Ok(()),
            Ok(other) => Err(protocol_violation("ReleaseInterface", &other)),
            // the device is gone, so the claim is gone with it
            Err(Error::Peer(PeerError::NotFound | PeerError::NoDevice)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Control transfer on endpoint 0
    pub fn control_transfer(
        &self,
        device_id: DeviceId,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: TransferPayload,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.ensure_attached(device_id)?;
        let setup_in = request_type & descriptors::DIRECTION_IN_BIT != 0;
        let payload_in = payload.direction() == protocol::Direction::In;
        if setup_in != payload_in {
            return Err(Error::DirectionMismatch { endpoint: 0 });
        }
        self.submit(
            Request::ControlTransfer {
                device_id,
                request_type,
                request,
                value,
                index,
                payload,
                timeout_ms: timeout_ms(timeout),
            },
            timeout,
        )
    }

    /// Bulk transfer on a claimed interface's endpoint
    pub fn bulk_transfer(
        &self,
        device_id: DeviceId,
        endpoint: u8,
        payload: TransferPayload,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.validate_endpoint(device_id, endpoint, TransferKind::Bulk, &payload)?;
        self.submit(
            Request::BulkTransfer {
                device_id,
                endpoint,
                payload,
                timeout_ms: timeout_ms(timeout),
            },
            timeout,
        )
    }

    /// Interrupt transfer on a claimed interface's endpoint
    pub fn interrupt_transfer(
        &self,
        device_id: DeviceId,
        endpoint: u8,
        payload: TransferPayload,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.validate_endpoint(device_id, endpoint, TransferKind::Interrupt, &payload)?;
        self.submit(
            Request::InterruptTransfer {
                device_id,
                endpoint,
                payload,
                timeout_ms: timeout_ms(timeout),
            },
            timeout,
        )
    }

    /// Isochronous transfer; exposed for completeness, unused by the
    /// smart-card session layer
    pub fn isochronous_transfer(
        &self,
        device_id: DeviceId,
        endpoint: u8,
        payload: TransferPayload,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.validate_endpoint(device_id, endpoint, TransferKind::Isochronous, &payload)?;
        self.submit(
            Request::IsochronousTransfer {
                device_id,
                endpoint,
                payload,
                timeout_ms: timeout_ms(timeout),
            },
            timeout,
        )
    }

    /// Dispatch-thread entry: peer reported an attach
    pub(crate) fn device_arrived(&self, info: DeviceInfo) {
        self.registry.device_arrived(info);
    }

    /// Dispatch-thread entry: peer reported a detach
    ///
    /// Claims on the departed device are dropped locally; the peer-side
    /// claim died with the device.
    pub(crate) fn device_left(&self, device_id: DeviceId) {
        self.registry.device_left(device_id);
        self.claim_table().retain(|(id, _), _| *id != device_id);
    }

    /// Channel teardown: every device and claim is gone
    pub(crate) fn channel_closed(&self) {
        self.registry.detach_all();
        self.claim_table().clear();
    }

    /// Send a transfer and wait for its data
    ///
    /// On local timeout a best-effort `CancelTransfer` is posted; the call
    /// fails with `TransferTimedOut` whether or not the peer honours it.
    fn submit(&self, request: Request, timeout: Duration) -> Result<Vec<u8>> {
        let pending = self.correlator.send(request)?;
        let id = pending.id();
        match pending.wait_timeout(timeout) {
            Ok(ReplyPayload::TransferData { data }) => Ok(data),
            Ok(other) => Err(protocol_violation("transfer", &other)),
            Err(Error::TransferTimedOut) => {
                debug!("transfer {} timed out, posting cancellation", id.0);
                if let Err(e) = self.correlator.post(Request::CancelTransfer { request_id: id }) {
                    debug!("cancellation for {} not sent: {e}", id.0);
                }
                Err(Error::TransferTimedOut)
            }
            Err(Error::Peer(e)) => Err(map_transfer_peer_error(e)),
            Err(e) => Err(e),
        }
    }

    /// Check a transfer against the claimed endpoint's descriptor
    ///
    /// Mismatches are local validation failures and never reach the peer.
    fn validate_endpoint(
        &self,
        device_id: DeviceId,
        endpoint: u8,
        requested: TransferKind,
        payload: &TransferPayload,
    ) -> Result<()> {
        self.ensure_attached(device_id)?;
        let claims = self.claim_table();
        let descriptor = claims
            .iter()
            .filter(|((id, _), _)| *id == device_id)
            .flat_map(|(_, state)| state.endpoints.iter())
            .find(|ep| ep.endpoint_address == endpoint)
            .ok_or(Error::EndpointNotClaimed { endpoint })?;
        if descriptor.kind != requested {
            return Err(Error::TransferTypeMismatch {
                endpoint,
                declared: descriptor.kind,
                requested,
            });
        }
        if descriptor.direction != payload.direction() {
            return Err(Error::DirectionMismatch { endpoint });
        }
        Ok(())
    }

    fn ensure_attached(&self, device_id: DeviceId) -> Result<()> {
        if self.registry.is_attached(device_id) {
            Ok(())
        } else {
            Err(Error::DeviceNotFound)
        }
    }

    fn claim_table(&self) -> MutexGuard<'_, HashMap<(DeviceId, u8), ClaimState>> {
        self.claims.lock().expect("claim table mutex poisoned")
    }
}

fn protocol_violation(operation: &str, reply: &ReplyPayload) -> Error {
    warn!("peer answered {operation} with unexpected payload: {reply:?}");
    Error::UnexpectedReply
}

fn map_transfer_peer_error(e: PeerError) -> Error {
    match e {
        PeerError::NotFound | PeerError::NoDevice => Error::DeviceNotFound,
        PeerError::Timeout => Error::TransferTimedOut,
        other => Error::Peer(other),
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_peer_bridge;
    use common::test_utils::mock_device_info;

    fn proxy() -> (UsbDeviceProxy, common::TransportEnd) {
        let (link, transport) = create_peer_bridge();
        let proxy = UsbDeviceProxy::new(Arc::new(Correlator::new(link)));
        (proxy, transport)
    }

    #[test]
    fn unknown_device_is_rejected_locally() {
        let (proxy, _transport) = proxy();
        assert_eq!(
            proxy
                .configuration_descriptors(DeviceId(42))
                .map(|_| ()),
            Err(Error::DeviceNotFound)
        );
    }

    #[test]
    fn transfer_on_unclaimed_endpoint_is_rejected_locally() {
        let (proxy, _transport) = proxy();
        proxy.device_arrived(mock_device_info(1, 0x08e6, 0x3437));

        let result = proxy.bulk_transfer(
            DeviceId(1),
            0x82,
            TransferPayload::Read { length: 64 },
            Duration::from_millis(10),
        );
        assert_eq!(result, Err(Error::EndpointNotClaimed { endpoint: 0x82 }));
    }

    #[test]
    fn control_direction_mismatch_is_rejected_locally() {
        let (proxy, _transport) = proxy();
        proxy.device_arrived(mock_device_info(1, 0x08e6, 0x3437));

        // IN setup byte with an OUT payload
        let result = proxy.control_transfer(
            DeviceId(1),
            0xa1,
            0x00,
            0,
            0,
            TransferPayload::Write { data: vec![0x00] },
            Duration::from_millis(10),
        );
        assert_eq!(result, Err(Error::DirectionMismatch { endpoint: 0 }));
    }

    #[test]
    fn concurrent_claims_have_a_single_local_winner() {
        use common::test_utils::mock_ccid_configuration;
        use protocol::{Inbound, Reply};

        let (link, transport) = create_peer_bridge();
        let correlator = Arc::new(Correlator::new(link));
        let proxy = UsbDeviceProxy::new(Arc::clone(&correlator));
        proxy.device_arrived(mock_device_info(1, 0x08e6, 0x3437));

        // a peer that grants every claim; exclusivity must hold locally
        let server = std::thread::spawn(move || {
            while let Ok(envelope) = transport.next_request_blocking() {
                let result = match &envelope.request {
                    Request::GetConfigurations { .. } => Ok(ReplyPayload::Configurations {
                        configurations: vec![mock_ccid_configuration()],
                    }),
                    Request::ClaimInterface { .. } => Ok(ReplyPayload::InterfaceClaimed),
                    _ => Ok(ReplyPayload::InterfaceReleased),
                };
                let reply = Inbound::Reply(Reply {
                    id: envelope.id,
                    result,
                });
                if transport.send_inbound_blocking(reply).is_err() {
                    break;
                }
            }
        });

        let results: Vec<Result<InterfaceClaim>> = std::thread::scope(|scope| {
            let a = scope.spawn(|| proxy.claim_interface(DeviceId(1), 0));
            let b = scope.spawn(|| proxy.claim_interface(DeviceId(1), 0));
            vec![a.join().unwrap(), b.join().unwrap()]
        });
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|result| matches!(result, Err(Error::InterfaceBusy)))
        );

        drop(proxy);
        drop(correlator);
        server.join().unwrap();
    }

    #[test]
    fn peer_error_mapping() {
        assert_eq!(
            map_transfer_peer_error(PeerError::NoDevice),
            Error::DeviceNotFound
        );
        assert_eq!(
            map_transfer_peer_error(PeerError::Timeout),
            Error::TransferTimedOut
        );
        assert_eq!(
            map_transfer_peer_error(PeerError::Stall),
            Error::Peer(PeerError::Stall)
        );
    }
}
