//! Engine error taxonomy
//!
//! Every public operation returns one of these as an ordinary value; the
//! provider adapter maps them onto the result codes of the embedding
//! environment. Nothing here is ever raised as a panic across the API
//! boundary.

use protocol::{DescriptorError, PeerError, TransferKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Unknown or already-released context or card handle
    #[error("invalid handle")]
    InvalidHandle,

    /// No recognized smart-card reader is attached
    #[error("no readers available")]
    NoReadersAvailable,

    /// The reader's device detached after Connect
    #[error("reader unavailable")]
    ReaderUnavailable,

    /// The interface is already claimed
    #[error("interface busy")]
    InterfaceBusy,

    /// The device id does not name a live device
    #[error("device not found")]
    DeviceNotFound,

    /// The peer sent an inconsistent or truncated descriptor
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(#[from] DescriptorError),

    /// The wait for a transfer reply timed out
    #[error("transfer timed out")]
    TransferTimedOut,

    /// The message channel to the peer is closed
    #[error("channel closed")]
    ChannelClosed,

    /// The peer has not signalled readiness yet
    #[error("peer not ready")]
    NotReady,

    /// Transfer submitted against an endpoint outside any claimed interface
    #[error("endpoint {endpoint:#04x} is not on a claimed interface")]
    EndpointNotClaimed { endpoint: u8 },

    /// Transfer type does not match the endpoint descriptor
    #[error("endpoint {endpoint:#04x} is {declared:?}, not {requested:?}")]
    TransferTypeMismatch {
        endpoint: u8,
        declared: TransferKind,
        requested: TransferKind,
    },

    /// Payload direction does not match the endpoint or setup direction
    #[error("direction mismatch on endpoint {endpoint:#04x}")]
    DirectionMismatch { endpoint: u8 },

    /// Command APDU exceeds the configured maximum
    #[error("APDU of {len} bytes exceeds the {max}-byte maximum")]
    ApduTooLong { len: usize, max: usize },

    /// The peer answered with the wrong reply variant
    #[error("unexpected reply from peer")]
    UnexpectedReply,

    /// A peer-side USB failure with no more specific local mapping
    #[error("peer reported: {0:?}")]
    Peer(PeerError),
}

pub type Result<T> = std::result::Result<T, Error>;
