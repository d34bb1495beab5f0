//! Error types for the lecturer-beacon crate.

use thiserror::Error;
use tracing::error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available on this platform or no adapter is present.
    #[error("Bluetooth is not supported on this platform")]
    BluetoothUnavailable,

    /// A beacon read was attempted without a connected device.
    #[error("No device connected")]
    NoDeviceConnected,

    /// The device chooser finished without a selection.
    #[error("No Bluetooth device selected")]
    NoDeviceSelected,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the device was lost.
    #[error("Bluetooth device disconnected")]
    ConnectionLost,

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The server answered with a non-success status.
    #[error("{message}")]
    Request {
        /// HTTP status code, when a response was received.
        status: Option<u16>,
        /// Human-readable message extracted from the response body.
        message: String,
    },

    /// No bearer token is stored.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// An HTTP request could not be built (bad URL or header).
    #[error("Invalid HTTP request: {0}")]
    HttpRequest(#[from] hyper::http::Error),

    /// A JSON body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from storage or configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not determine the configuration directory.
    #[error("Could not determine config directory")]
    ConfigDirNotFound,

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether this error means the peripheral went away.
    ///
    /// A disconnect-class error ends the current scan session; any other
    /// poll error is only logged.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Bluetooth(btleplug::Error::NotConnected)
        )
    }

    /// HTTP status of a failed request, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            _ => None,
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Install a process-wide panic hook that reports panics through `tracing`.
///
/// Panics in spawned tasks (poll ticks, disconnect listeners) surface here.
/// The hook only logs; it does not restore scanner state.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        error!("Unhandled panic at {}: {}", location, payload);
    }));
}
