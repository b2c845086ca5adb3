//! Protocol library for scard-bridge
//!
//! This crate defines the messages exchanged between the sandboxed
//! smart-card engine and the privileged USB peer: the device and descriptor
//! data model, the request/reply/event envelopes, and the validation that
//! turns raw peer-sent descriptors into a trusted model.
//!
//! The wire encoding is owned by the transport collaborator; every type here
//! derives `serde` traits so any encoding can carry them.
//!
//! # Example
//!
//! ```
//! use protocol::{Request, RequestEnvelope, RequestId};
//!
//! let envelope = RequestEnvelope {
//!     id: RequestId(1),
//!     request: Request::ListDevices,
//! };
//! assert_eq!(envelope.id, RequestId(1));
//! ```

pub mod descriptors;
pub mod error;
pub mod messages;
pub mod types;

pub use error::DescriptorError;
pub use messages::{Event, Inbound, Reply, ReplyPayload, Request, RequestEnvelope};
pub use types::{
    ConfigurationDescriptor, DeviceId, DeviceInfo, Direction, EndpointDescriptor,
    InterfaceDescriptor, PeerError, RawConfigurationDescriptor, RawEndpointDescriptor,
    RawInterfaceDescriptor, RequestId, TransferKind, TransferPayload,
    SMART_CARD_INTERFACE_CLASS,
};
