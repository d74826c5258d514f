//! Connection Manager
//!
//! Single-peripheral state machine. One task owns the scanner, the link and
//! the published state; callers talk to it through a [`ConnectionHandle`] and
//! the platform talks to it through [`AdapterEvent`]s. Adapter events are
//! always drained before caller commands, and long operations (connect,
//! discovery, write) keep draining them, so a power-off or disconnect ends
//! an operation in flight instead of leaving it blocked.

use crate::domain::models::{ConnectionState, DeviceId, DiscoveredDevice};
use crate::error::ConnectionError;
use crate::infrastructure::bluetooth::{
    backend::{AdapterEvent, BleBackend},
    connection::{BleConnection, ConnectionConfig},
    scanner::BleScanner,
};
use anyhow::Context;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

type Reply = oneshot::Sender<Result<(), ConnectionError>>;

enum Command {
    StartScan(Reply),
    StopScan(oneshot::Sender<()>),
    Connect(DeviceId, Reply),
    Disconnect(Reply),
    Toggle(Reply),
    Write(Vec<u8>, Reply),
    Shutdown(oneshot::Sender<()>),
}

/// Why a guarded operation did not complete
enum OpFailure {
    TimedOut,
    Interrupted(ConnectionState),
    Failed(anyhow::Error),
}

impl fmt::Display for OpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => f.write_str("timed out"),
            Self::Interrupted(state) => write!(f, "interrupted, adapter now {}", state),
            Self::Failed(e) => write!(f, "{:#}", e),
        }
    }
}

struct Link {
    device: DeviceId,
    services_discovered: bool,
}

/// Owner of the one board connection
pub struct ConnectionManager {
    connection: BleConnection,
    scanner: BleScanner,
    link: Option<Link>,
    events: mpsc::UnboundedReceiver<AdapterEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    devices_tx: watch::Sender<Vec<DiscoveredDevice>>,
}

impl ConnectionManager {
    /// Subscribe to the adapter, settle the initial state and spawn the
    /// manager task.
    ///
    /// `restored` is a device believed connected from a previous session.
    /// It is only trusted if the adapter confirms the link is alive.
    pub async fn start(
        backend: Arc<dyn BleBackend>,
        config: ConnectionConfig,
        restored: Option<DeviceId>,
    ) -> anyhow::Result<ConnectionHandle> {
        let (event_tx, events) = mpsc::unbounded_channel();
        backend
            .subscribe(event_tx)
            .await
            .context("Failed to subscribe to Bluetooth adapter events")?;

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::PoweredOff);
        let (devices_tx, devices_rx) = watch::channel(Vec::new());

        let mut manager = Self {
            connection: BleConnection::new(backend, config),
            scanner: BleScanner::new(),
            link: None,
            events,
            commands,
            state_tx,
            devices_tx,
        };

        manager.initialize(restored).await;
        tokio::spawn(manager.run());

        Ok(ConnectionHandle {
            commands: command_tx,
            state: state_rx,
            devices: devices_rx,
        })
    }

    async fn initialize(&mut self, restored: Option<DeviceId>) {
        let powered = match self.connection.backend().is_powered_on().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Could not read adapter state, assuming powered off: {:#}", e);
                false
            }
        };
        self.set_state(if powered {
            ConnectionState::PoweredOnIdle
        } else {
            ConnectionState::PoweredOff
        });

        let Some(device) = restored else {
            return;
        };
        if !powered {
            info!("Adapter is powered off, dropping restored device {}", device);
            return;
        }

        match self.connection.check_alive(&device).await {
            Ok(true) => {
                info!("Restored connection to {} is alive", device);
                self.link = Some(Link {
                    device: device.clone(),
                    services_discovered: false,
                });
                self.set_state(ConnectionState::Connected(device));
            }
            Ok(false) => {
                info!("Device {} was not actually connected, clearing state", device);
                self.set_state(ConnectionState::DisconnectedError);
            }
            Err(e) => {
                let error = ConnectionError::LinkCheck {
                    device,
                    reason: format!("{:#}", e),
                };
                warn!("Error checking connection state, clearing: {}", error);
                self.set_state(ConnectionState::DisconnectedError);
            }
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.handle_adapter_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.cleanup().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.cleanup().await;
                        break;
                    }
                },
            }
        }
        info!("Connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan(reply) => {
                let _ = reply.send(self.start_scan().await);
            }
            Command::StopScan(reply) => {
                self.stop_scan().await;
                let _ = reply.send(());
            }
            Command::Connect(device, reply) => {
                let _ = reply.send(self.connect(device).await);
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Toggle(reply) => {
                let result = match self.state() {
                    ConnectionState::PoweredOff => Err(ConnectionError::NotPoweredOn),
                    ConnectionState::Connected(_) => self.disconnect().await,
                    _ => self.start_scan().await,
                };
                let _ = reply.send(result);
            }
            Command::Write(data, reply) => {
                let _ = reply.send(self.write(data).await);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::PoweredOn => {
                info!("BLE state changed: powered on");
                if self.state() == ConnectionState::PoweredOff {
                    self.set_state(ConnectionState::PoweredOnIdle);
                }
            }
            AdapterEvent::PoweredOff => {
                info!("BLE state changed: powered off");
                if let Some(link) = self.link.take() {
                    info!("BLE powered off, clearing connected device {}", link.device);
                }
                self.scanner.mark_stopped();
                self.set_state(ConnectionState::PoweredOff);
            }
            AdapterEvent::Advertisement(device) => {
                if self.state() == ConnectionState::Scanning && self.scanner.record(device) {
                    self.publish_devices();
                }
            }
            AdapterEvent::Disconnected(device) => match self.state() {
                ConnectionState::Connected(current) | ConnectionState::Connecting(current)
                    if current == device =>
                {
                    warn!("Device disconnected: {}", device);
                    self.link = None;
                    self.set_state(ConnectionState::DisconnectedError);
                }
                _ => debug!("Ignoring disconnect of untracked device {}", device),
            },
        }
    }

    async fn start_scan(&mut self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::PoweredOff => return Err(ConnectionError::NotPoweredOn),
            ConnectionState::Connected(device) => {
                return Err(ConnectionError::AlreadyConnected(device))
            }
            _ => {}
        }

        // Stop any existing scan
        self.halt_scan().await;
        if !self.state().is_powered_on() {
            return Err(ConnectionError::NotPoweredOn);
        }

        self.scanner.reset();
        self.publish_devices();
        self.set_state(ConnectionState::Scanning);

        let service = self.connection.config().advertising_service_uuid;
        info!("Starting BLE scan for service UUID: {}", service);
        let backend = self.connection.backend().clone();
        let limit = self.connection.config().operation_timeout;
        match self
            .guarded(limit, async move { backend.start_scan(service).await })
            .await
        {
            Ok(()) => {
                self.scanner.mark_started();
                Ok(())
            }
            Err(failure) => {
                let error = ConnectionError::Scan(failure.to_string());
                error!("Failed to start BLE scan: {}", error);
                if self.state() == ConnectionState::Scanning {
                    self.set_state(ConnectionState::PoweredOnIdle);
                }
                Err(error)
            }
        }
    }

    async fn stop_scan(&mut self) {
        self.halt_scan().await;
        if self.state() == ConnectionState::Scanning {
            self.set_state(ConnectionState::PoweredOnIdle);
        }
    }

    /// End the scan session. The session is over even if the adapter
    /// reports an error or an event cuts the call short.
    async fn halt_scan(&mut self) {
        if !self.scanner.is_scanning() {
            return;
        }
        self.scanner.mark_stopped();

        info!("Stopping BLE scan...");
        let backend = self.connection.backend().clone();
        let limit = self.connection.config().operation_timeout;
        if let Err(failure) = self
            .guarded(limit, async move { backend.stop_scan().await })
            .await
        {
            warn!("Failed to stop scan cleanly: {}", failure);
        }
    }

    async fn connect(&mut self, device: DeviceId) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::PoweredOff => return Err(ConnectionError::NotPoweredOn),
            ConnectionState::Connected(current) if current == device => return Ok(()),
            ConnectionState::Connected(current) => {
                info!("Dropping link to {} before connecting to {}", current, device);
                self.link = None;
                self.connection.release(&current).await;
            }
            _ => {}
        }

        // Never connect while a scan is in flight
        self.halt_scan().await;
        if !self.state().is_powered_on() {
            return Err(ConnectionError::NotPoweredOn);
        }
        self.set_state(ConnectionState::Connecting(device.clone()));

        let connection = self.connection.clone();
        let target = device.clone();
        let limit = self.connection.config().connect_timeout;
        let result = self
            .guarded(limit, async move { connection.connect(&target).await })
            .await;

        match result {
            Ok(()) => {
                info!("Connected to device: {}", device);
                debug!("Watching {} for disconnects", device);
                self.link = Some(Link {
                    device: device.clone(),
                    services_discovered: false,
                });
                self.set_state(ConnectionState::Connected(device));
                Ok(())
            }
            Err(failure) => {
                let error = ConnectionError::Connect {
                    device: device.clone(),
                    reason: failure.to_string(),
                };
                error!("Connection error: {}", error);
                self.connection.release(&device).await;
                if self.state() == ConnectionState::Connecting(device) {
                    self.set_state(ConnectionState::DisconnectedError);
                }
                Err(error)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let ConnectionState::Connected(device) = self.state() else {
            return Err(ConnectionError::NotConnected);
        };

        self.link = None;
        match self.connection.disconnect(&device).await {
            Ok(()) => info!("Disconnected from device {}", device),
            Err(e) => warn!("Disconnect error for {}: {:#}", device, e),
        }
        self.set_state(ConnectionState::PoweredOnIdle);
        Ok(())
    }

    async fn write(&mut self, data: Vec<u8>) -> Result<(), ConnectionError> {
        let Some(link) = self.link.as_ref() else {
            error!("No connected device for BLE write ({} bytes dropped)", data.len());
            return Err(ConnectionError::NotConnected);
        };
        let device = link.device.clone();
        let limit = self.connection.config().operation_timeout;

        if !link.services_discovered {
            let connection = self.connection.clone();
            let target = device.clone();
            if let Err(failure) = self
                .guarded(limit, async move { connection.discover(&target).await })
                .await
            {
                let error = ConnectionError::Discovery {
                    device,
                    reason: failure.to_string(),
                };
                error!(
                    "BLE write error: {} ({} bytes: {})",
                    error,
                    data.len(),
                    crate::infrastructure::bluetooth::protocol::hex_dump(&data)
                );
                return Err(error);
            }
            if let Some(link) = self.link.as_mut() {
                link.services_discovered = true;
            }
        }

        let connection = self.connection.clone();
        let target = device.clone();
        let payload = data.clone();
        match self
            .guarded(limit, async move {
                connection.write_packet(&target, &payload).await
            })
            .await
        {
            Ok(()) => {
                info!("Successfully wrote {} bytes to characteristic", data.len());
                Ok(())
            }
            Err(failure) => {
                let error = ConnectionError::Write {
                    device,
                    len: data.len(),
                    reason: failure.to_string(),
                };
                error!(
                    "BLE write error: {} ({})",
                    error,
                    crate::infrastructure::bluetooth::protocol::hex_dump(&data)
                );
                Err(error)
            }
        }
    }

    /// Run `op` under a time limit while still applying adapter events.
    /// Gives up as soon as an event moves the state away from where it was
    /// when the operation began.
    async fn guarded<T, F>(&mut self, limit: Duration, op: F) -> Result<T, OpFailure>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let expected = self.state();
        let op = tokio::time::timeout(limit, op);
        tokio::pin!(op);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => {
                    self.handle_adapter_event(event);
                    let now = self.state();
                    if now != expected {
                        return Err(OpFailure::Interrupted(now));
                    }
                }
                result = &mut op => {
                    return match result {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(OpFailure::Failed(e)),
                        Err(_) => Err(OpFailure::TimedOut),
                    };
                }
            }
        }
    }

    async fn cleanup(&mut self) {
        self.halt_scan().await;
        if let Some(link) = self.link.take() {
            if let Err(e) = self.connection.disconnect(&link.device).await {
                debug!("Error during cleanup disconnect: {:#}", e);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Connection state: {} -> {}", current, state);
            *current = state;
            true
        });
    }

    fn publish_devices(&self) {
        let devices = self.scanner.devices();
        self.devices_tx.send_if_modified(|current| {
            if current.as_slice() == devices {
                return false;
            }
            *current = devices.to_vec();
            true
        });
    }
}

/// Cloneable handle to the connection manager.
///
/// Every call is serialized through the manager task. Failures are logged
/// there; the plain calls collapse them to `false`.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    devices: watch::Receiver<Vec<DiscoveredDevice>>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Connected(_))
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Devices seen in the current scan session, in first-seen order
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.borrow().clone()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<DiscoveredDevice>> {
        self.devices.clone()
    }

    /// Wait until the state satisfies `predicate`, or `limit` passes
    pub async fn wait_for_state(
        &self,
        limit: Duration,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(limit, async move {
            state.wait_for(predicate).await.map(|current| current.clone())
        })
        .await;
        match waited {
            Ok(Ok(current)) => Some(current),
            Ok(Err(e)) => {
                debug!("State channel closed while waiting: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    /// Scan until `until` accepts the device list or `window` passes, then
    /// stop the scan and return what was found.
    pub async fn scan_for(
        &self,
        window: Duration,
        mut until: impl FnMut(&[DiscoveredDevice]) -> bool,
    ) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
        self.try_start_scan().await?;

        let mut devices = self.devices.clone();
        let waited = tokio::time::timeout(window, async move {
            devices.wait_for(|found| until(found)).await.map(|_| ())
        })
        .await;
        if let Ok(Err(e)) = waited {
            debug!("Device list closed while scanning: {}", e);
        }

        let found = self.discovered_devices();
        self.stop_scan().await;
        Ok(found)
    }

    /// Connect to `target`, or to the first board found when there is none.
    ///
    /// An existing link to the target is kept. A link to another board is
    /// dropped before scanning, since a connected adapter will not scan.
    pub async fn connect_to_board(
        &self,
        target: Option<DeviceId>,
        window: Duration,
    ) -> Result<DeviceId, ConnectionError> {
        if let Some(current) = self.state().connected_device().cloned() {
            match &target {
                Some(target) if *target != current => {
                    info!("Switching from {} to {}", current, target);
                    self.disconnect().await;
                }
                _ => {
                    info!("Already connected to {}", current);
                    return Ok(current);
                }
            }
        }

        let devices = self
            .scan_for(window, |found| match &target {
                Some(target) => found.iter().any(|d| &d.id == target),
                None => !found.is_empty(),
            })
            .await?;

        let device = match target {
            Some(target) => {
                if !devices.iter().any(|d| d.id == target) {
                    warn!("Board {} not seen in scan, trying anyway", target);
                }
                target
            }
            None => match devices.first() {
                Some(first) => {
                    info!("Using first board found: {}", first.display_name());
                    first.id.clone()
                }
                None => return Err(ConnectionError::NoBoardFound),
            },
        };

        self.try_connect(device.clone()).await?;
        Ok(device)
    }

    pub async fn try_start_scan(&self) -> Result<(), ConnectionError> {
        self.request(Command::StartScan).await
    }

    pub async fn start_scan(&self) -> bool {
        self.try_start_scan().await.is_ok()
    }

    pub async fn stop_scan(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::StopScan(reply)).is_ok() {
            let _ = response.await;
        }
    }

    pub async fn try_connect(&self, device: DeviceId) -> Result<(), ConnectionError> {
        self.request(|reply| Command::Connect(device, reply)).await
    }

    pub async fn connect(&self, device: DeviceId) -> bool {
        self.try_connect(device).await.is_ok()
    }

    pub async fn disconnect(&self) -> bool {
        self.request(Command::Disconnect).await.is_ok()
    }

    /// Disconnect when connected, otherwise scan. Ignored while powered off.
    pub async fn toggle(&self) -> bool {
        self.request(Command::Toggle).await.is_ok()
    }

    pub async fn try_write(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let data = data.to_vec();
        self.request(|reply| Command::Write(data, reply)).await
    }

    /// Confirmed write of one packet to the board
    pub async fn write(&self, data: &[u8]) -> bool {
        self.try_write(data).await.is_ok()
    }

    /// Stop scanning, drop the link and end the manager task
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).is_ok() {
            let _ = response.await;
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<(), ConnectionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ConnectionError::ManagerStopped)?;
        response.await.map_err(|_| ConnectionError::ManagerStopped)?
    }
}
