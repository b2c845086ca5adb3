//! Common utilities for scard-bridge
//!
//! Shared plumbing between the engine and its embedders: error and logging
//! setup, the channel bridge that connects blocking engine threads to the
//! asynchronous transport collaborator, and mock builders for tests.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{PeerLink, TransportEnd, create_peer_bridge};
pub use error::{Error, Result};
pub use logging::init_logging;
