//! BLE Connection Module
//!
//! Link-level operations against one board: connect, liveness check,
//! GATT discovery and confirmed writes to the data characteristic.

use crate::domain::models::DeviceId;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::backend::BleBackend;
use crate::infrastructure::bluetooth::protocol::{self, hex_dump};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service UUID boards advertise
    pub advertising_service_uuid: Uuid,
    /// Service UUID holding the data characteristic
    pub data_service_uuid: Uuid,
    /// Data characteristic UUID
    pub data_char_uuid: Uuid,
    /// Upper bound for establishing a link
    pub connect_timeout: Duration,
    /// Upper bound for scan control, liveness checks, discovery and writes
    pub operation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            advertising_service_uuid: protocol::ADVERTISING_SERVICE_UUID,
            data_service_uuid: protocol::DATA_SERVICE_UUID,
            data_char_uuid: protocol::DATA_CHAR_UUID,
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            advertising_service_uuid: parse_uuid(&settings.ble_advertising_service_uuid)?,
            data_service_uuid: parse_uuid(&settings.ble_data_service_uuid)?,
            data_char_uuid: parse_uuid(&settings.ble_data_char_uuid)?,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms),
        })
    }
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim()).with_context(|| format!("Invalid UUID format: {}", uuid_str))
}

/// BLE Connection handler. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct BleConnection {
    backend: Arc<dyn BleBackend>,
    config: ConnectionConfig,
}

impl BleConnection {
    /// Create a new connection handler
    pub fn new(backend: Arc<dyn BleBackend>, config: ConnectionConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn BleBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish the link
    pub async fn connect(&self, device: &DeviceId) -> Result<()> {
        info!("Connecting to Bluetooth device: {}", device);
        self.backend.connect(device).await
    }

    /// Best-effort teardown; errors are only worth a debug line.
    pub async fn release(&self, device: &DeviceId) {
        match tokio::time::timeout(self.config.operation_timeout, self.backend.disconnect(device))
            .await
        {
            Ok(Ok(())) => debug!("Released link to {}", device),
            Ok(Err(e)) => debug!("Error releasing link to {}: {:#}", device, e),
            Err(_) => debug!("Timed out releasing link to {}", device),
        }
    }

    pub async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        tokio::time::timeout(self.config.operation_timeout, self.backend.disconnect(device))
            .await
            .context("Timed out disconnecting")?
    }

    /// Ask the adapter whether the link is really up
    pub async fn check_alive(&self, device: &DeviceId) -> Result<bool> {
        tokio::time::timeout(self.config.operation_timeout, self.backend.is_connected(device))
            .await
            .context("Timed out checking connection")?
    }

    /// Discover services and make sure the data characteristic is reachable
    pub async fn discover(&self, device: &DeviceId) -> Result<()> {
        info!("Discovering services on {}", device);
        self.backend.discover_services(device).await
    }

    /// Confirmed write of one packet to the data characteristic
    pub async fn write_packet(&self, device: &DeviceId, data: &[u8]) -> Result<()> {
        info!(
            "Writing to characteristic ({} bytes): {}",
            data.len(),
            hex_dump(data)
        );
        for (index, byte) in data.iter().enumerate() {
            let ascii = if byte.is_ascii_graphic() || *byte == b' ' {
                char::from(*byte)
            } else {
                '·'
            };
            trace!("[{:>3}]: 0x{:02X} ({:>3}) {}", index, byte, byte, ascii);
        }

        self.backend
            .write(
                device,
                self.config.data_service_uuid,
                self.config.data_char_uuid,
                data,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{MockBackend, MockOp};

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid("6E400002-B5A3-F393-E0A9-E50E24DCCA9E").unwrap();
        assert_eq!(uuid, protocol::DATA_CHAR_UUID);
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.connect_timeout_ms = 1500;
        let config = ConnectionConfig::from_settings(&settings).unwrap();

        assert_eq!(config.advertising_service_uuid, protocol::ADVERTISING_SERVICE_UUID);
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));

        settings.ble_data_char_uuid = "bogus".to_string();
        assert!(ConnectionConfig::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_write_packet_targets_data_characteristic() {
        let backend = MockBackend::new();
        let connection = BleConnection::new(backend.clone(), ConnectionConfig::default());
        let device = DeviceId::new("board");

        connection
            .write_packet(&device, &[0x01, 0x01, 0xAB, 0x02, 0x54, 0x03])
            .await
            .unwrap();

        assert_eq!(
            backend.ops(),
            vec![MockOp::Write {
                device,
                service: protocol::DATA_SERVICE_UUID,
                characteristic: protocol::DATA_CHAR_UUID,
                data: vec![0x01, 0x01, 0xAB, 0x02, 0x54, 0x03],
            }]
        );
    }
}
