//! Known-device registry
//!
//! Tracks the peer-reported device set. Entries are invalidated in place on
//! detach instead of removed, so a stale id can never alias a device that
//! attached later under a recycled identifier.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use protocol::{DeviceId, DeviceInfo};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct DeviceEntry {
    info: DeviceInfo,
    attached: bool,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<DeviceId, DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the attached set with a fresh enumeration snapshot
    pub fn apply_snapshot(&self, devices: &[DeviceInfo]) {
        let mut table = self.table();
        for entry in table.values_mut() {
            entry.attached = false;
        }
        for info in devices {
            table.insert(
                info.id,
                DeviceEntry {
                    info: info.clone(),
                    attached: true,
                },
            );
        }
        debug!("device snapshot applied: {} attached", devices.len());
    }

    /// Record a hotplug arrival
    pub fn device_arrived(&self, info: DeviceInfo) {
        info!(
            "device {} attached ({:04x}:{:04x})",
            info.id.0, info.vendor_id, info.product_id
        );
        self.table().insert(
            info.id,
            DeviceEntry {
                info,
                attached: true,
            },
        );
    }

    /// Record a hotplug departure; returns false for ids never seen
    pub fn device_left(&self, id: DeviceId) -> bool {
        match self.table().get_mut(&id) {
            Some(entry) => {
                entry.attached = false;
                info!("device {} detached", id.0);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, id: DeviceId) -> bool {
        self.table().get(&id).is_some_and(|entry| entry.attached)
    }

    /// Invalidate every device (channel teardown)
    pub fn detach_all(&self) {
        for entry in self.table().values_mut() {
            entry.attached = false;
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<DeviceId, DeviceEntry>> {
        self.devices.lock().expect("device registry mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::mock_device_info;

    #[test]
    fn snapshot_marks_missing_devices_detached() {
        let registry = DeviceRegistry::new();
        registry.apply_snapshot(&[mock_device_info(1, 0x08e6, 0x3437)]);
        assert!(registry.is_attached(DeviceId(1)));

        registry.apply_snapshot(&[mock_device_info(2, 0x04e6, 0x5116)]);
        assert!(!registry.is_attached(DeviceId(1)));
        assert!(registry.is_attached(DeviceId(2)));
    }

    #[test]
    fn detached_entry_is_kept_invalid() {
        let registry = DeviceRegistry::new();
        registry.device_arrived(mock_device_info(5, 0x08e6, 0x3437));
        assert!(registry.device_left(DeviceId(5)));
        // the entry stays around but can no longer be used
        assert!(!registry.is_attached(DeviceId(5)));
        assert!(!registry.device_left(DeviceId(99)));
    }

    #[test]
    fn detach_all_invalidates_everything() {
        let registry = DeviceRegistry::new();
        registry.apply_snapshot(&[
            mock_device_info(1, 0x08e6, 0x3437),
            mock_device_info(2, 0x04e6, 0x5116),
        ]);
        registry.detach_all();
        assert!(!registry.is_attached(DeviceId(1)));
        assert!(!registry.is_attached(DeviceId(2)));
    }
}
