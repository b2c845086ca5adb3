//! Descriptor validation
//!
//! Turns the raw wire descriptors into the validated model. Every declared
//! count and length is checked against the data the peer actually sent
//! before anything is indexed, and the direction and transfer type are
//! decoded from the USB address and attribute bits.

use crate::error::DescriptorError;
use crate::types::{
    ConfigurationDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor,
    RawConfigurationDescriptor, RawEndpointDescriptor, RawInterfaceDescriptor, TransferKind,
};

/// Direction bit of an endpoint address or bmRequestType byte.
pub const DIRECTION_IN_BIT: u8 = 0x80;

/// Decode the direction from an endpoint address byte
pub fn decode_direction(endpoint_address: u8) -> Direction {
    if endpoint_address & DIRECTION_IN_BIT != 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Decode the transfer type from a bmAttributes byte
pub fn decode_kind(attributes: u8) -> TransferKind {
    match attributes & 0x03 {
        0b00 => TransferKind::Control,
        0b01 => TransferKind::Isochronous,
        0b10 => TransferKind::Bulk,
        0b11 => TransferKind::Interrupt,
        _ => unreachable!(),
    }
}

fn validate_extra(declared: u16, extra: Vec<u8>) -> Result<Option<Vec<u8>>, DescriptorError> {
    if usize::from(declared) != extra.len() {
        return Err(DescriptorError::ExtraLength {
            declared,
            actual: extra.len(),
        });
    }
    if extra.is_empty() {
        Ok(None)
    } else {
        Ok(Some(extra))
    }
}

fn validate_endpoint(raw: RawEndpointDescriptor) -> Result<EndpointDescriptor, DescriptorError> {
    let extra = validate_extra(raw.extra_length, raw.extra)?;
    Ok(EndpointDescriptor {
        endpoint_address: raw.endpoint_address,
        direction: decode_direction(raw.endpoint_address),
        kind: decode_kind(raw.attributes),
        max_packet_size: raw.max_packet_size,
        extra,
    })
}

fn validate_interface(raw: RawInterfaceDescriptor) -> Result<InterfaceDescriptor, DescriptorError> {
    if usize::from(raw.num_endpoints) != raw.endpoints.len() {
        return Err(DescriptorError::EndpointCount {
            interface_number: raw.interface_number,
            declared: raw.num_endpoints,
            actual: raw.endpoints.len(),
        });
    }
    let extra = validate_extra(raw.extra_length, raw.extra)?;
    let endpoints = raw
        .endpoints
        .into_iter()
        .map(validate_endpoint)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InterfaceDescriptor {
        interface_number: raw.interface_number,
        interface_class: raw.interface_class,
        interface_subclass: raw.interface_subclass,
        interface_protocol: raw.interface_protocol,
        extra,
        endpoints,
    })
}

/// Validate one raw configuration descriptor into the model
pub fn validate_configuration(
    raw: RawConfigurationDescriptor,
) -> Result<ConfigurationDescriptor, DescriptorError> {
    if usize::from(raw.num_interfaces) != raw.interfaces.len() {
        return Err(DescriptorError::InterfaceCount {
            declared: raw.num_interfaces,
            actual: raw.interfaces.len(),
        });
    }
    let extra = validate_extra(raw.extra_length, raw.extra)?;
    let interfaces = raw
        .interfaces
        .into_iter()
        .map(validate_interface)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConfigurationDescriptor {
        active: raw.active,
        configuration_value: raw.configuration_value,
        extra,
        interfaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_endpoint(address: u8, attributes: u8) -> RawEndpointDescriptor {
        RawEndpointDescriptor {
            endpoint_address: address,
            attributes,
            max_packet_size: 64,
            extra_length: 0,
            extra: Vec::new(),
        }
    }

    fn raw_configuration() -> RawConfigurationDescriptor {
        RawConfigurationDescriptor {
            active: true,
            configuration_value: 1,
            extra_length: 0,
            extra: Vec::new(),
            num_interfaces: 1,
            interfaces: vec![RawInterfaceDescriptor {
                interface_number: 0,
                interface_class: 0x0b,
                interface_subclass: 0,
                interface_protocol: 0,
                extra_length: 0,
                extra: Vec::new(),
                num_endpoints: 2,
                endpoints: vec![raw_endpoint(0x02, 0b10), raw_endpoint(0x82, 0b10)],
            }],
        }
    }

    #[test]
    fn direction_decoding() {
        assert_eq!(decode_direction(0x81), Direction::In);
        assert_eq!(decode_direction(0x01), Direction::Out);
    }

    #[test]
    fn kind_decoding() {
        assert_eq!(decode_kind(0b00), TransferKind::Control);
        assert_eq!(decode_kind(0b01), TransferKind::Isochronous);
        assert_eq!(decode_kind(0b10), TransferKind::Bulk);
        assert_eq!(decode_kind(0b11), TransferKind::Interrupt);
        // high attribute bits (sync/usage for iso endpoints) are ignored
        assert_eq!(decode_kind(0b0000_0111), TransferKind::Interrupt);
    }

    #[test]
    fn valid_configuration_passes() {
        let config = validate_configuration(raw_configuration()).unwrap();
        assert!(config.active);
        assert_eq!(config.interfaces.len(), 1);
        let endpoints = &config.interfaces[0].endpoints;
        assert_eq!(endpoints[0].direction, Direction::Out);
        assert_eq!(endpoints[1].direction, Direction::In);
        assert_eq!(endpoints[1].kind, TransferKind::Bulk);
        assert!(config.extra.is_none());
    }

    #[test]
    fn interface_count_mismatch_rejected() {
        let mut raw = raw_configuration();
        raw.num_interfaces = 3;
        assert_eq!(
            validate_configuration(raw),
            Err(DescriptorError::InterfaceCount {
                declared: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn endpoint_count_mismatch_rejected() {
        let mut raw = raw_configuration();
        raw.interfaces[0].num_endpoints = 1;
        assert_eq!(
            validate_configuration(raw),
            Err(DescriptorError::EndpointCount {
                interface_number: 0,
                declared: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn extra_length_mismatch_rejected() {
        let mut raw = raw_configuration();
        raw.interfaces[0].endpoints[0].extra_length = 4;
        assert_eq!(
            validate_configuration(raw),
            Err(DescriptorError::ExtraLength {
                declared: 4,
                actual: 0
            })
        );
    }

    #[test]
    fn nonempty_extra_is_kept() {
        let mut raw = raw_configuration();
        raw.extra_length = 3;
        raw.extra = vec![0x36, 0x21, 0x10];
        let config = validate_configuration(raw).unwrap();
        assert_eq!(config.extra.as_deref(), Some(&[0x36, 0x21, 0x10][..]));
    }
}
