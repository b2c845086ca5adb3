//! USB data model shared with the privileged peer
//!
//! This module defines the device and descriptor types exchanged over the
//! message channel. Descriptors arrive in two flavors: raw wire structs that
//! carry their own declared counts and lengths (exactly as the peer sent
//! them), and the validated model produced by [`crate::descriptors`] after
//! every declared size has been checked.

use serde::{Deserialize, Serialize};

/// Interface class assigned to smart-card readers (CCID).
pub const SMART_CARD_INTERFACE_CLASS: u8 = 0x0b;

/// Transient device identifier (peer-assigned)
///
/// Stays constant for one physical device while it remains attached. The
/// peer never hands out the same id for two live devices, so a stale id can
/// only ever name a device that is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Request identifier for matching replies
///
/// Allocated monotonically by the correlator; unique for the lifetime of
/// the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Device information returned by enumeration
///
/// The optional strings are absent when the peer could not read the
/// corresponding string descriptor from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Peer-assigned device identifier
    pub id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device release number (bcdDevice), if available
    pub version: Option<u16>,
    /// iProduct string, if available
    pub product: Option<String>,
    /// iManufacturer string, if available
    pub manufacturer: Option<String>,
    /// iSerialNumber string, if available
    pub serial_number: Option<String>,
}

/// Endpoint direction, decoded from bit 7 of the address byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Transfer and endpoint type, decoded from the low two attribute bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Data carried by a transfer, by direction
///
/// Making the direction explicit lets the proxy check it against the
/// endpoint descriptor before anything reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPayload {
    /// IN transfer: number of bytes the caller wants to read
    Read {
        /// Receive buffer size in bytes
        length: u32,
    },
    /// OUT transfer: bytes to write
    Write {
        /// Data to send
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl TransferPayload {
    /// Direction implied by the payload variant
    pub fn direction(&self) -> Direction {
        match self {
            TransferPayload::Read { .. } => Direction::In,
            TransferPayload::Write { .. } => Direction::Out,
        }
    }
}

/// Endpoint descriptor as the peer sent it
///
/// `extra_length` is the peer's own claim about `extra`; nothing here is
/// trusted until [`crate::descriptors::validate_configuration`] has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEndpointDescriptor {
    /// bEndpointAddress (direction bit included)
    pub endpoint_address: u8,
    /// bmAttributes
    pub attributes: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    /// Declared length of `extra`
    pub extra_length: u16,
    /// Class-specific descriptor bytes
    #[serde(with = "serde_bytes")]
    pub extra: Vec<u8>,
}

/// Interface descriptor as the peer sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInterfaceDescriptor {
    /// bInterfaceNumber
    pub interface_number: u8,
    /// bInterfaceClass
    pub interface_class: u8,
    /// bInterfaceSubClass
    pub interface_subclass: u8,
    /// bInterfaceProtocol
    pub interface_protocol: u8,
    /// Declared length of `extra`
    pub extra_length: u16,
    /// Class-specific descriptor bytes
    #[serde(with = "serde_bytes")]
    pub extra: Vec<u8>,
    /// Declared number of endpoints
    pub num_endpoints: u8,
    /// Endpoint descriptors in declaration order
    pub endpoints: Vec<RawEndpointDescriptor>,
}

/// Configuration descriptor as the peer sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConfigurationDescriptor {
    /// Whether this configuration is the active one
    pub active: bool,
    /// bConfigurationValue
    pub configuration_value: u8,
    /// Declared length of `extra`
    pub extra_length: u16,
    /// Class-specific descriptor bytes
    #[serde(with = "serde_bytes")]
    pub extra: Vec<u8>,
    /// Declared number of interfaces
    pub num_interfaces: u8,
    /// Interface descriptors in declaration order
    pub interfaces: Vec<RawInterfaceDescriptor>,
}

/// Validated endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress (direction bit included)
    pub endpoint_address: u8,
    /// Direction decoded from the address byte
    pub direction: Direction,
    /// Transfer type decoded from bmAttributes
    pub kind: TransferKind,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    /// Class-specific descriptor bytes, if any
    pub extra: Option<Vec<u8>>,
}

/// Validated interface descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// Class-specific descriptor bytes, if any
    pub extra: Option<Vec<u8>>,
    /// Endpoints in declaration order
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Validated configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub active: bool,
    pub configuration_value: u8,
    /// Class-specific descriptor bytes, if any
    pub extra: Option<Vec<u8>>,
    /// Interfaces in declaration order
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Peer-reported USB failure
///
/// Mirrors the libusb error vocabulary the privileged peer works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerError {
    /// Entity (device, interface, endpoint) not found
    NotFound,
    /// Device has been disconnected
    NoDevice,
    /// Endpoint stalled
    Stall,
    /// Transfer timed out on the peer side
    Timeout,
    /// Resource busy (e.g. interface claimed by another client)
    Busy,
    /// Buffer overflow
    Overflow,
    /// I/O error
    Io,
    /// Access denied
    Access,
    /// Anything else, with a message
    Other { message: String },
}
