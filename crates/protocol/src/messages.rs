//! Protocol message definitions
//!
//! Every outbound message is a [`RequestEnvelope`]; every inbound message is
//! an [`Inbound`], either a correlated [`Reply`] or an unsolicited [`Event`].
//! The wire encoding is owned by the transport collaborator; these types only
//! fix the field set and the request/reply pairing.

use crate::types::{
    DeviceId, DeviceInfo, PeerError, RawConfigurationDescriptor, RequestId, TransferPayload,
};
use serde::{Deserialize, Serialize};

/// Outbound message: one correlated request to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, echoed back in the reply
    pub id: RequestId,
    /// Operation to perform
    pub request: Request,
}

/// Operations the peer performs on our behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Enumerate currently attached USB devices
    ListDevices,

    /// Fetch the configuration descriptors of one device
    GetConfigurations {
        /// Device to inspect
        device_id: DeviceId,
    },

    /// Claim an interface for exclusive use
    ClaimInterface {
        device_id: DeviceId,
        interface_number: u8,
    },

    /// Release a previously claimed interface
    ReleaseInterface {
        device_id: DeviceId,
        interface_number: u8,
    },

    /// Control transfer on endpoint 0
    ControlTransfer {
        device_id: DeviceId,
        /// bmRequestType (direction bit included)
        request_type: u8,
        /// bRequest
        request: u8,
        /// wValue
        value: u16,
        /// wIndex
        index: u16,
        payload: TransferPayload,
        timeout_ms: u32,
    },

    /// Bulk transfer on a claimed interface's endpoint
    BulkTransfer {
        device_id: DeviceId,
        /// Endpoint address (direction bit included)
        endpoint: u8,
        payload: TransferPayload,
        timeout_ms: u32,
    },

    /// Interrupt transfer on a claimed interface's endpoint
    InterruptTransfer {
        device_id: DeviceId,
        /// Endpoint address (direction bit included)
        endpoint: u8,
        payload: TransferPayload,
        timeout_ms: u32,
    },

    /// Isochronous transfer; exposed for completeness, unused by the
    /// smart-card session layer
    IsochronousTransfer {
        device_id: DeviceId,
        /// Endpoint address (direction bit included)
        endpoint: u8,
        payload: TransferPayload,
        timeout_ms: u32,
    },

    /// Best-effort cancellation of an in-flight transfer; no reply expected
    CancelTransfer {
        /// Id of the transfer request to cancel
        request_id: RequestId,
    },
}

/// Inbound correlated reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request being answered
    pub id: RequestId,
    /// Operation outcome
    pub result: Result<ReplyPayload, PeerError>,
}

/// Successful reply payloads, paired with [`Request`] variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyPayload {
    /// Answer to [`Request::ListDevices`]
    Devices {
        /// Devices in peer enumeration order
        devices: Vec<DeviceInfo>,
    },

    /// Answer to [`Request::GetConfigurations`]
    Configurations {
        /// Raw descriptors, not yet validated
        configurations: Vec<RawConfigurationDescriptor>,
    },

    /// Answer to [`Request::ClaimInterface`]
    InterfaceClaimed,

    /// Answer to [`Request::ReleaseInterface`]
    InterfaceReleased,

    /// Answer to any transfer request; empty for OUT transfers
    TransferData {
        /// Bytes read from the device
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

/// Unsolicited events from the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A USB device was attached
    DeviceArrived {
        /// Full device information
        device: DeviceInfo,
    },

    /// A USB device was detached
    DeviceLeft {
        /// Id of the departed device
        device_id: DeviceId,
    },
}

/// Any message the peer can deliver to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inbound {
    /// Correlated reply to an outstanding request
    Reply(Reply),
    /// Unsolicited event
    Event(Event),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_construction() {
        let envelope = RequestEnvelope {
            id: RequestId(7),
            request: Request::ListDevices,
        };
        assert_eq!(envelope.id, RequestId(7));
        assert_eq!(envelope.request, Request::ListDevices);
    }

    #[test]
    fn reply_carries_peer_error() {
        let reply = Reply {
            id: RequestId(1),
            result: Err(PeerError::NoDevice),
        };
        assert_eq!(reply.result, Err(PeerError::NoDevice));
    }
}
