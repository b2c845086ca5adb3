//! Protocol error types

use thiserror::Error;

/// Descriptor validation failures
///
/// Raised when a descriptor's declared counts or lengths disagree with what
/// the peer actually sent. Array lengths from the peer are never trusted
/// until these checks have run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Declared interface count disagrees with the interface list
    #[error("configuration declares {declared} interfaces, peer sent {actual}")]
    InterfaceCount { declared: u8, actual: usize },

    /// Declared endpoint count disagrees with the endpoint list
    #[error("interface {interface_number} declares {declared} endpoints, peer sent {actual}")]
    EndpointCount {
        interface_number: u8,
        declared: u8,
        actual: usize,
    },

    /// Declared extra-data length disagrees with the byte count
    #[error("extra data declares {declared} bytes, peer sent {actual}")]
    ExtraLength { declared: u16, actual: usize },

    /// No configuration is marked active
    #[error("device reported no active configuration")]
    NoActiveConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DescriptorError::InterfaceCount {
            declared: 2,
            actual: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("declares 2 interfaces"));
        assert!(msg.contains("peer sent 1"));
    }
}
