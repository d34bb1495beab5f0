//! BLE communication module.
//!
//! The scanner talks to Bluetooth through two small traits so hosts can
//! plug in a platform backend (btleplug by default) or a simulated one.

pub mod adapter;
pub mod connection;
pub mod uuids;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

pub use adapter::{BtleplugBackend, DeviceCandidate, DeviceSelector, NameFilterSelector};
pub use connection::{BtleplugDevice, ConnectionEvent, ConnectionState};
pub use uuids::*;

/// What the device chooser should offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDeviceOptions {
    /// Offer every nearby device rather than only those advertising a
    /// service from `optional_services`.
    pub accept_all_devices: bool,
    /// Services the caller intends to use once connected.
    pub optional_services: Vec<Uuid>,
    /// Only offer devices whose name contains this string.
    pub name_filter: Option<String>,
}

impl RequestDeviceOptions {
    /// Options used when looking for a lecturer beacon.
    pub fn beacon() -> Self {
        Self {
            accept_all_devices: true,
            optional_services: vec![BEACON_SERVICE_UUID],
            name_filter: None,
        }
    }

    /// Restrict the offered devices by name.
    pub fn with_name_filter(mut self, filter: Option<String>) -> Self {
        self.name_filter = filter;
        self
    }
}

/// A platform Bluetooth stack.
#[async_trait]
pub trait BluetoothBackend: Send + Sync {
    /// Whether Bluetooth can be used at all.
    async fn is_available(&self) -> bool;

    /// Let the user pick a nearby device. The device is not yet connected.
    async fn request_device(&self, options: &RequestDeviceOptions) -> Result<Arc<dyn GattDevice>>;
}

/// A selected peripheral and its GATT server.
#[async_trait]
pub trait GattDevice: Send + Sync {
    /// Platform identifier of the peripheral.
    fn id(&self) -> String;

    /// Advertised name, if any.
    fn name(&self) -> Option<String>;

    /// Connect to the GATT server.
    async fn connect(&self) -> Result<()>;

    /// Disconnect from the GATT server. Disconnecting twice is not an error.
    async fn disconnect(&self) -> Result<()>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Read a characteristic from a primary service.
    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Subscribe to connection state changes, including unsolicited drops.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_request_options() {
        let options = RequestDeviceOptions::beacon().with_name_filter(Some("LECTURER".into()));
        assert!(options.accept_all_devices);
        assert_eq!(options.optional_services, vec![BEACON_SERVICE_UUID]);
        assert_eq!(options.name_filter.as_deref(), Some("LECTURER"));
    }
}
