//! USB device proxy layer
//!
//! Models USB topology as reported by the privileged peer and translates
//! synchronous-looking USB operations into correlated channel requests.

pub mod devices;
pub mod proxy;

pub use devices::DeviceRegistry;
pub use proxy::{InterfaceClaim, UsbDeviceProxy};
