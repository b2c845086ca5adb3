//! Test utilities for scard-bridge
//!
//! Mock devices and descriptor trees shared by unit and integration tests
//! across crates.

use protocol::{
    DeviceId, DeviceInfo, RawConfigurationDescriptor, RawEndpointDescriptor,
    RawInterfaceDescriptor, SMART_CARD_INTERFACE_CLASS,
};

/// Create a mock DeviceInfo with full string descriptors
pub fn mock_device_info(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    let product = format!("Test Reader {id}");
    mock_named_device(
        id,
        vendor_id,
        product_id,
        Some("Test Manufacturer"),
        Some(product.as_str()),
    )
}

/// Create a mock DeviceInfo with specific (possibly absent) strings
pub fn mock_named_device(
    id: u32,
    vendor_id: u16,
    product_id: u16,
    manufacturer: Option<&str>,
    product: Option<&str>,
) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId(id),
        vendor_id,
        product_id,
        version: Some(0x0100),
        product: product.map(str::to_string),
        manufacturer: manufacturer.map(str::to_string),
        serial_number: Some(format!("SN{id:06}")),
    }
}

/// Create a raw endpoint descriptor with no extra data
pub fn mock_raw_endpoint(endpoint_address: u8, attributes: u8) -> RawEndpointDescriptor {
    RawEndpointDescriptor {
        endpoint_address,
        attributes,
        max_packet_size: 64,
        extra_length: 0,
        extra: Vec::new(),
    }
}

/// Create a raw configuration with one CCID-style smart-card interface
///
/// Interface 0, class 0x0b, with bulk OUT 0x02, bulk IN 0x82 and an
/// interrupt IN 0x83 endpoint, the shape of a typical USB reader.
pub fn mock_ccid_configuration() -> RawConfigurationDescriptor {
    RawConfigurationDescriptor {
        active: true,
        configuration_value: 1,
        extra_length: 0,
        extra: Vec::new(),
        num_interfaces: 1,
        interfaces: vec![RawInterfaceDescriptor {
            interface_number: 0,
            interface_class: SMART_CARD_INTERFACE_CLASS,
            interface_subclass: 0,
            interface_protocol: 0,
            extra_length: 0,
            extra: Vec::new(),
            num_endpoints: 3,
            endpoints: vec![
                mock_raw_endpoint(0x02, 0b10),
                mock_raw_endpoint(0x82, 0b10),
                mock_raw_endpoint(0x83, 0b11),
            ],
        }],
    }
}

/// Create a raw configuration with a single vendor-specific interface
///
/// Not recognizable as a smart-card reader.
pub fn mock_vendor_configuration() -> RawConfigurationDescriptor {
    RawConfigurationDescriptor {
        active: true,
        configuration_value: 1,
        extra_length: 0,
        extra: Vec::new(),
        num_interfaces: 1,
        interfaces: vec![RawInterfaceDescriptor {
            interface_number: 0,
            interface_class: 0xff,
            interface_subclass: 0,
            interface_protocol: 0,
            extra_length: 0,
            extra: Vec::new(),
            num_endpoints: 2,
            endpoints: vec![
                mock_raw_endpoint(0x01, 0b10),
                mock_raw_endpoint(0x81, 0b10),
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_device_has_strings() {
        let device = mock_device_info(3, 0x08e6, 0x3437);
        assert_eq!(device.id, DeviceId(3));
        assert!(device.manufacturer.is_some());
        assert!(device.product.is_some());
        assert!(device.serial_number.is_some());
    }

    #[test]
    fn mock_named_device_can_omit_strings() {
        let device = mock_named_device(1, 0x1234, 0x5678, None, None);
        assert!(device.manufacturer.is_none());
        assert!(device.product.is_none());
    }

    #[test]
    fn ccid_configuration_validates() {
        let config = protocol::descriptors::validate_configuration(mock_ccid_configuration())
            .expect("mock CCID configuration must validate");
        assert_eq!(
            config.interfaces[0].interface_class,
            SMART_CARD_INTERFACE_CLASS
        );
        assert_eq!(config.interfaces[0].endpoints.len(), 3);
    }

    #[test]
    fn vendor_configuration_is_not_a_reader() {
        let config = protocol::descriptors::validate_configuration(mock_vendor_configuration())
            .expect("mock vendor configuration must validate");
        assert_ne!(
            config.interfaces[0].interface_class,
            SMART_CARD_INTERFACE_CLASS
        );
    }
}
