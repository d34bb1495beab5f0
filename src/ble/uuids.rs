//! BLE Service and Characteristic UUIDs.
//!
//! The beacon exposes its name through a characteristic shaped like the
//! standard Device Name characteristic, inside a Battery-Service-shaped
//! service.

use uuid::Uuid;

/// Service the beacon name is read from (Battery Service shaped).
pub const BEACON_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);

/// Characteristic holding the UTF-8 beacon name (Device Name shaped).
pub const DEVICE_NAME_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a00_0000_1000_8000_00805f9b34fb);

/// Check if a service UUID is the beacon service.
pub fn is_beacon_service(uuid: &Uuid) -> bool {
    *uuid == BEACON_SERVICE_UUID
}
