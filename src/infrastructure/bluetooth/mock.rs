//! Scripted in-memory backend for exercising the connection state machine
//! without a radio.

use crate::domain::models::DeviceId;
use crate::infrastructure::bluetooth::backend::{AdapterEvent, BleBackend};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    StartScan(Uuid),
    StopScan,
    /// Connect attempt, with whether a scan was active at the time
    Connect { device: DeviceId, while_scanning: bool },
    Disconnect(DeviceId),
    IsConnected(DeviceId),
    DiscoverServices(DeviceId),
    Write {
        device: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct MockState {
    powered: bool,
    scanning: bool,
    connected: HashSet<DeviceId>,
    ops: Vec<MockOp>,
    fail_scan: bool,
    hang_scan: bool,
    fail_connect: bool,
    hang_connect: bool,
    fail_discovery: bool,
    fail_write: bool,
    hang_write: bool,
    link_check_error: bool,
    events: Option<mpsc::UnboundedSender<AdapterEvent>>,
}

#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.lock().powered = true;
        Arc::new(backend)
    }

    pub fn powered_off() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.lock().ops.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                MockOp::Write { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Pretend a link to `device` already exists, as after a restart.
    pub fn set_connected(&self, device: &DeviceId) {
        self.lock().connected.insert(device.clone());
    }

    pub fn fail_next_scan(&self) {
        self.lock().fail_scan = true;
    }

    /// Scan start and stop calls never return
    pub fn hang_scan(&self) {
        self.lock().hang_scan = true;
    }

    pub fn fail_connect(&self) {
        self.lock().fail_connect = true;
    }

    pub fn hang_connect(&self) {
        self.lock().hang_connect = true;
    }

    pub fn fail_discovery(&self) {
        self.lock().fail_discovery = true;
    }

    pub fn fail_write(&self) {
        self.lock().fail_write = true;
    }

    pub fn hang_write(&self) {
        self.lock().hang_write = true;
    }

    pub fn fail_link_check(&self) {
        self.lock().link_check_error = true;
    }

    /// Push an adapter event as the platform would.
    pub fn emit(&self, event: AdapterEvent) {
        let mut state = self.lock();
        match &event {
            AdapterEvent::PoweredOn => state.powered = true,
            AdapterEvent::PoweredOff => {
                state.powered = false;
                state.scanning = false;
                state.connected.clear();
            }
            AdapterEvent::Disconnected(device) => {
                state.connected.remove(device);
            }
            AdapterEvent::Advertisement(_) => {}
        }
        if let Some(events) = &state.events {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    async fn subscribe(&self, events: mpsc::UnboundedSender<AdapterEvent>) -> Result<()> {
        self.lock().events = Some(events);
        Ok(())
    }

    async fn is_powered_on(&self) -> Result<bool> {
        Ok(self.lock().powered)
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        let hang = {
            let mut state = self.lock();
            state.ops.push(MockOp::StartScan(service));
            if std::mem::take(&mut state.fail_scan) {
                anyhow::bail!("scan refused");
            }
            state.scanning = true;
            state.hang_scan
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let hang = {
            let mut state = self.lock();
            state.ops.push(MockOp::StopScan);
            state.scanning = false;
            state.hang_scan
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let hang = {
            let mut state = self.lock();
            let while_scanning = state.scanning;
            state.ops.push(MockOp::Connect {
                device: device.clone(),
                while_scanning,
            });
            if state.fail_connect {
                anyhow::bail!("connection refused");
            }
            if !state.hang_connect {
                state.connected.insert(device.clone());
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let mut state = self.lock();
        state.ops.push(MockOp::Disconnect(device.clone()));
        state.connected.remove(device);
        Ok(())
    }

    async fn is_connected(&self, device: &DeviceId) -> Result<bool> {
        let mut state = self.lock();
        state.ops.push(MockOp::IsConnected(device.clone()));
        if state.link_check_error {
            anyhow::bail!("device unknown to adapter");
        }
        Ok(state.connected.contains(device))
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<()> {
        let mut state = self.lock();
        state.ops.push(MockOp::DiscoverServices(device.clone()));
        if state.fail_discovery {
            anyhow::bail!("GATT discovery failed");
        }
        Ok(())
    }

    async fn write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()> {
        let hang = {
            let mut state = self.lock();
            state.ops.push(MockOp::Write {
                device: device.clone(),
                service,
                characteristic,
                data: data.to_vec(),
            });
            if state.fail_write {
                anyhow::bail!("write not permitted");
            }
            state.hang_write
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
