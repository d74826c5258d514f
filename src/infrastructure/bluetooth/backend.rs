//! BLE Backend Seam
//!
//! The connection manager talks to the radio only through [`BleBackend`].
//! Push-style platform callbacks (power changes, advertisements,
//! disconnects) are delivered as [`AdapterEvent`] messages on a channel the
//! manager owns, so every state transition happens on the manager's task.

use crate::domain::models::{DeviceId, DiscoveredDevice};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events pushed by the platform adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    PoweredOn,
    PoweredOff,
    /// An advertisement matching the scan filter
    Advertisement(DiscoveredDevice),
    Disconnected(DeviceId),
}

#[async_trait]
pub trait BleBackend: Send + Sync + 'static {
    /// Start forwarding adapter events into `events`. Called once.
    async fn subscribe(&self, events: mpsc::UnboundedSender<AdapterEvent>) -> Result<()>;

    async fn is_powered_on(&self) -> Result<bool>;

    /// Scan for peripherals advertising `service`
    async fn start_scan(&self, service: Uuid) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, device: &DeviceId) -> Result<()>;

    async fn disconnect(&self, device: &DeviceId) -> Result<()>;

    async fn is_connected(&self, device: &DeviceId) -> Result<bool>;

    /// Discover services and characteristics of a connected peripheral
    async fn discover_services(&self, device: &DeviceId) -> Result<()>;

    /// Write with response to `characteristic` within `service`
    async fn write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()>;
}
