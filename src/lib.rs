// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # lecturer-beacon
//!
//! Student-side attendance client for Bluetooth lecturer beacons.
//!
//! A lecturer's device advertises a name of the form `LECTURER_<id>`. This
//! library connects to that device over Bluetooth Low Energy, reads the name
//! every few seconds and reports each new beacon id to the attendance
//! backend with the student's bearer token.
//!
//! ## Features
//!
//! - **Session Guard**: Bearer-token lookup, logout and login redirect
//! - **Request Client**: Authenticated JSON requests with server error messages
//! - **Beacon Scanner**: Poll a connected device and report each beacon once
//! - **Status Presenter**: Start/stop button and status panel state
//! - **Utilities**: MAC address validation and locale-aware date formatting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lecturer_beacon::{
//!     ApiClient, BeaconScanner, BtleplugBackend, Config, ConsoleNotifier, ConsolePresenter,
//!     FileTokenStore, LogNavigator, NameFilterSelector, Result, SessionGuard,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     let store = Arc::new(FileTokenStore::new(config.resolved_storage_path()?));
//!     let guard = Arc::new(SessionGuard::with_config(store, Arc::new(LogNavigator), &config));
//!     if guard.check_auth().is_none() {
//!         return Ok(());
//!     }
//!
//!     let notifier = Arc::new(ConsoleNotifier);
//!     let api = Arc::new(ApiClient::new(&config.api_base_url, guard, notifier.clone()));
//!     let selector = Arc::new(NameFilterSelector::new(config.device_name_filter.clone()));
//!     let backend = BtleplugBackend::new(selector, config.discovery_window()).await;
//!
//!     let scanner = BeaconScanner::with_config(
//!         Some(Arc::new(backend)),
//!         api,
//!         notifier,
//!         Arc::new(ConsolePresenter),
//!         &config,
//!     );
//!     scanner.start_bluetooth_scan().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     scanner.stop_bluetooth_scan().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod api;
pub mod ble;
pub mod config;
pub mod error;
pub mod notify;
pub mod presenter;
pub mod scanner;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use api::{ApiClient, HttpTransport, HyperTransport, RequestOptions};
pub use config::Config;
pub use error::{install_panic_hook, Error, Result};
pub use notify::{ConsoleNotifier, LogNotifier, Notifier};
pub use presenter::{handle_error, ConsolePresenter, ScanStatus, StatusPresenter, StatusView};
pub use scanner::{BeaconScanner, PollOutcome};
pub use session::{
    FileTokenStore, LogNavigator, MemoryTokenStore, Navigator, SessionGuard, TokenStore,
};
pub use utils::{format_date, format_date_str, validate_mac_address};

// Re-export commonly used types from submodules
pub use ble::{
    BluetoothBackend, BtleplugBackend, ConnectionState, DeviceCandidate, DeviceSelector,
    GattDevice, NameFilterSelector, RequestDeviceOptions,
};
