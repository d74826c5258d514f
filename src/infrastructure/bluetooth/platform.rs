//! Platform BLE backend on top of btleplug.
//!
//! Uses the first adapter the OS reports. Peripherals are addressed by the
//! string form of btleplug's peripheral id, which is stable for the life of
//! the adapter session.

use crate::domain::models::{DeviceId, DiscoveredDevice};
use crate::infrastructure::bluetooth::backend::{AdapterEvent, BleBackend};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Default)]
struct Shared {
    /// Service the current scan is filtered on
    filter: Option<Uuid>,
    peripherals: HashMap<DeviceId, Peripheral>,
}

pub struct BtleplugBackend {
    adapter: Adapter,
    shared: Arc<Mutex<Shared>>,
}

impl BtleplugBackend {
    /// Open the first Bluetooth adapter
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .context("Failed to initialize Bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            shared: Arc::new(Mutex::new(Shared::default())),
        })
    }

    async fn peripheral(&self, device: &DeviceId) -> Result<Peripheral> {
        if let Some(peripheral) = lock(&self.shared).peripherals.get(device) {
            return Ok(peripheral.clone());
        }

        // Not seen in this session's events; ask the adapter directly
        for peripheral in self.adapter.peripherals().await? {
            if device_id(&peripheral.id()) == *device {
                lock(&self.shared)
                    .peripherals
                    .insert(device.clone(), peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(anyhow!("Unknown peripheral {}", device))
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(id.to_string())
}

/// Turn a discovery event into an advertisement, if it matches the filter
async fn advertisement(
    adapter: &Adapter,
    shared: &Mutex<Shared>,
    id: &PeripheralId,
) -> Option<DiscoveredDevice> {
    let filter = lock(shared).filter?;
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(e) => {
            trace!("No properties for {:?}: {}", id, e);
            return None;
        }
    };
    if !properties.services.contains(&filter) {
        return None;
    }

    let device = device_id(id);
    lock(shared)
        .peripherals
        .insert(device.clone(), peripheral);
    Some(DiscoveredDevice {
        id: device,
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    async fn subscribe(&self, events: mpsc::UnboundedSender<AdapterEvent>) -> Result<()> {
        let mut stream = self
            .adapter
            .events()
            .await
            .context("Failed to open adapter event stream")?;
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let forwarded = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        match advertisement(&adapter, &shared, &id).await {
                            Some(device) => AdapterEvent::Advertisement(device),
                            None => continue,
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        AdapterEvent::Disconnected(device_id(&id))
                    }
                    CentralEvent::StateUpdate(CentralState::PoweredOn) => AdapterEvent::PoweredOn,
                    CentralEvent::StateUpdate(CentralState::PoweredOff) => {
                        AdapterEvent::PoweredOff
                    }
                    _ => continue,
                };
                if events.send(forwarded).is_err() {
                    break;
                }
            }
            debug!("Adapter event stream closed");
        });
        Ok(())
    }

    async fn is_powered_on(&self) -> Result<bool> {
        let state = self.adapter.adapter_state().await?;
        Ok(matches!(state, CentralState::PoweredOn))
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        lock(&self.shared).filter = Some(service);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        lock(&self.shared).filter = None;
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self, device: &DeviceId) -> Result<bool> {
        let peripheral = self.peripheral(device).await?;
        Ok(peripheral.is_connected().await?)
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        peripheral.discover_services().await?;
        let count = peripheral.characteristics().len();
        debug!("Discovered {} characteristics on {}", count, device);
        Ok(())
    }

    async fn write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                warn!("Characteristic {} not found on {}", characteristic, device);
                anyhow!("Characteristic {} not found in service {}", characteristic, service)
            })?;
        peripheral
            .write(&target, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}
