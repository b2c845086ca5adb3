//! Reader recognition and naming

use std::collections::HashMap;

use protocol::{
    ConfigurationDescriptor, DeviceInfo, InterfaceDescriptor, SMART_CARD_INTERFACE_CLASS,
};

/// Find the smart-card interface in a configuration, if any
pub fn smart_card_interface(config: &ConfigurationDescriptor) -> Option<&InterfaceDescriptor> {
    config
        .interfaces
        .iter()
        .find(|iface| iface.interface_class == SMART_CARD_INTERFACE_CLASS)
}

/// Derive display names for one enumeration snapshot
///
/// Names keep the peer's enumeration order. Identical devices get a
/// two-digit index suffix counted within the snapshot, so the suffixes are
/// stable as long as the snapshot is.
pub fn derive_reader_names(devices: &[DeviceInfo]) -> Vec<String> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    devices
        .iter()
        .map(|info| {
            let base = base_name(info);
            let index = seen.entry(base.clone()).or_insert(0);
            let name = format!("{base} {index:02}");
            *index += 1;
            name
        })
        .collect()
}

/// Display name from the device's string descriptors
///
/// Falls back to the VID:PID pair when the device carries no strings.
fn base_name(info: &DeviceInfo) -> String {
    match (info.manufacturer.as_deref(), info.product.as_deref()) {
        (Some(manufacturer), Some(product)) => format!("{manufacturer} {product}"),
        (None, Some(product)) => product.to_string(),
        (Some(manufacturer), None) => manufacturer.to_string(),
        (None, None) => format!(
            "USB Reader {:04x}:{:04x}",
            info.vendor_id, info.product_id
        ),
    }
}
