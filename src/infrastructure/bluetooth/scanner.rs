//! BLE Scanner Module
//!
//! Tracks the scan session: whether a scan is active, and the boards seen
//! since it started. The adapter calls themselves are issued by the
//! connection manager so they can be cut short by adapter events.

use crate::domain::models::DiscoveredDevice;
use tracing::debug;

/// Scan session state for discovering boards
#[derive(Debug, Default)]
pub struct BleScanner {
    active: bool,
    devices: Vec<DiscoveredDevice>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every board from the previous session
    pub fn reset(&mut self) {
        self.devices.clear();
    }

    pub fn mark_started(&mut self) {
        self.active = true;
    }

    /// The scan ended, either on request or because the adapter went away.
    pub fn mark_stopped(&mut self) {
        self.active = false;
    }

    /// Update a known device in place or append a new one.
    /// Returns whether the set changed.
    pub fn record(&mut self, device: DiscoveredDevice) -> bool {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) if *existing == device => false,
            Some(existing) => {
                *existing = device;
                true
            }
            None => {
                debug!("Found device: {}", device.display_name());
                self.devices.push(device);
                true
            }
        }
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceId;

    fn device(id: &str, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(id),
            name: Some(format!("Board {}", id)),
            rssi: Some(rssi),
        }
    }

    #[test]
    fn test_record_keeps_first_seen_order() {
        let mut scanner = BleScanner::new();

        assert!(scanner.record(device("a", -70)));
        assert!(scanner.record(device("b", -60)));
        assert!(scanner.record(device("a", -40)));
        assert!(!scanner.record(device("a", -40)));

        let devices = scanner.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, DeviceId::new("a"));
        assert_eq!(devices[0].rssi, Some(-40));
        assert_eq!(devices[1].id, DeviceId::new("b"));
    }

    #[test]
    fn test_reset_starts_a_fresh_session() {
        let mut scanner = BleScanner::new();
        scanner.mark_started();
        scanner.record(device("a", -70));

        scanner.reset();
        assert!(scanner.devices().is_empty());
        assert!(scanner.is_scanning());

        scanner.mark_stopped();
        assert!(!scanner.is_scanning());
    }
}
