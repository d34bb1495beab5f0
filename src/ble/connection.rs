//! BLE connection management.
//!
//! Wraps a btleplug peripheral as a [`GattDevice`]: connecting, reading
//! characteristics, and reporting disconnects the adapter observes.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::{is_beacon_service, GattDevice};
use crate::error::{Error, Result};

/// Connection state for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the device.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the device.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The identifier of the peripheral.
    pub identifier: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// State shared with the disconnect watcher task.
struct SharedState {
    identifier: String,
    state: RwLock<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl SharedState {
    fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Update the connection state and emit an event.
    fn set(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: self.identifier.clone(),
                state: new_state,
            });
        }
    }
}

/// A btleplug peripheral exposed as a [`GattDevice`].
pub struct BtleplugDevice {
    /// Adapter the peripheral was found on; source of disconnect events.
    adapter: Adapter,
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Name seen while scanning.
    name: Option<String>,
    shared: Arc<SharedState>,
    /// Task translating adapter disconnect events into state changes.
    watch_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BtleplugDevice {
    /// Wrap a discovered peripheral.
    pub fn new(adapter: Adapter, peripheral: Peripheral, name: Option<String>) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            shared: Arc::new(SharedState {
                identifier: peripheral.id().to_string(),
                state: RwLock::new(ConnectionState::Disconnected),
                event_tx,
            }),
            adapter,
            peripheral,
            name,
            watch_handle: RwLock::new(None),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn spawn_disconnect_watch(&self) {
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch for disconnects: {}", e);
                return;
            }
        };

        let shared = self.shared.clone();
        let id = self.peripheral.id();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(peer) = event {
                    if peer == id {
                        info!("Device {} disconnected", shared.identifier);
                        shared.set(ConnectionState::Disconnected);
                        break;
                    }
                }
            }
            debug!("Disconnect watcher ended");
        });

        if let Some(previous) = self.watch_handle.write().replace(handle) {
            previous.abort();
        }
    }

    fn stop_disconnect_watch(&self) {
        if let Some(handle) = self.watch_handle.write().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl GattDevice for BtleplugDevice {
    fn id(&self) -> String {
        self.shared.identifier.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<()> {
        let current_state = self.shared.get();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        self.shared.set(ConnectionState::Connecting);

        if let Err(e) = self.peripheral.connect().await {
            warn!("Connection to {} failed: {}", self.shared.identifier, e);
            self.shared.set(ConnectionState::Disconnected);
            return Err(Error::ConnectionFailed {
                reason: e.to_string(),
            });
        }

        info!("Connected to {}", self.shared.identifier);

        if let Err(e) = self.peripheral.discover_services().await {
            warn!("Failed to discover services: {}", e);
        } else if !self
            .peripheral
            .services()
            .iter()
            .any(|s| is_beacon_service(&s.uuid))
        {
            warn!("{} does not expose the beacon service", self.shared.identifier);
        }

        self.spawn_disconnect_watch().await;
        self.shared.set(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_disconnect_watch();

        match self.shared.get() {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => return Ok(()),
            _ => {}
        }

        self.shared.set(ConnectionState::Disconnecting);

        match self.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from {}", self.shared.identifier);
                self.shared.set(ConnectionState::Disconnected);
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                self.shared.set(ConnectionState::Disconnected);
                Err(Error::Bluetooth(e))
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        if !self.shared.get().is_connected() {
            return Err(Error::ConnectionLost);
        }

        let target = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        let data = self.peripheral.read(&target).await.map_err(|e| match e {
            btleplug::Error::NotConnected => Error::ConnectionLost,
            other => Error::Bluetooth(other),
        })?;

        trace!("Read {} bytes from characteristic {}", data.len(), characteristic);

        Ok(data)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }
}

impl Drop for BtleplugDevice {
    fn drop(&mut self) {
        self.stop_disconnect_watch();
    }
}
