//! Native device chooser built on btleplug.
//!
//! Scans for a fixed window, collects the peripherals seen, and hands the
//! list to a [`DeviceSelector`] that plays the role of the platform's
//! device-picker dialog.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::ble::connection::BtleplugDevice;
use crate::ble::{BluetoothBackend, GattDevice, RequestDeviceOptions};
use crate::error::{Error, Result};

/// A peripheral offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Platform identifier.
    pub identifier: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Bluetooth address as text.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DeviceCandidate {
    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Picks one device out of the candidates, or none to cancel.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Return the index of the chosen candidate.
    async fn select(&self, candidates: &[DeviceCandidate]) -> Option<usize>;
}

/// Chooses the strongest candidate whose name contains a filter.
#[derive(Debug, Clone, Default)]
pub struct NameFilterSelector {
    filter: Option<String>,
}

impl NameFilterSelector {
    /// Select by name substring; `None` takes the first candidate.
    pub fn new(filter: Option<String>) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl DeviceSelector for NameFilterSelector {
    async fn select(&self, candidates: &[DeviceCandidate]) -> Option<usize> {
        match &self.filter {
            None => (!candidates.is_empty()).then_some(0),
            Some(filter) => candidates.iter().position(|c| {
                c.name
                    .as_deref()
                    .map(|n| n.contains(filter.as_str()))
                    .unwrap_or(false)
            }),
        }
    }
}

/// Order candidates strongest signal first; unknown RSSI sorts last.
pub fn sort_by_signal(candidates: &mut [DeviceCandidate]) {
    candidates.sort_by_key(|c| std::cmp::Reverse(c.rssi.unwrap_or(i16::MIN)));
}

/// [`BluetoothBackend`] for the host's first Bluetooth adapter.
pub struct BtleplugBackend {
    adapter: Option<Adapter>,
    selector: Arc<dyn DeviceSelector>,
    discovery_window: Duration,
}

impl BtleplugBackend {
    /// Open the first adapter. A host without one yields a backend that
    /// reports itself unavailable.
    pub async fn new(selector: Arc<dyn DeviceSelector>, discovery_window: Duration) -> Self {
        let adapter = match Self::first_adapter().await {
            Ok(adapter) => {
                info!(
                    "Using Bluetooth adapter: {:?}",
                    adapter.adapter_info().await.ok()
                );
                Some(adapter)
            }
            Err(e) => {
                warn!("Bluetooth unavailable: {}", e);
                None
            }
        };

        Self {
            adapter,
            selector,
            discovery_window,
        }
    }

    /// Use a specific adapter.
    pub fn with_adapter(
        adapter: Adapter,
        selector: Arc<dyn DeviceSelector>,
        discovery_window: Duration,
    ) -> Self {
        Self {
            adapter: Some(adapter),
            selector,
            discovery_window,
        }
    }

    async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)
    }
}

#[async_trait]
impl BluetoothBackend for BtleplugBackend {
    async fn is_available(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.adapter_info().await.is_ok(),
            None => false,
        }
    }

    async fn request_device(&self, options: &RequestDeviceOptions) -> Result<Arc<dyn GattDevice>> {
        let adapter = self.adapter.as_ref().ok_or(Error::BluetoothUnavailable)?;

        let filter = if options.accept_all_devices {
            ScanFilter::default()
        } else {
            ScanFilter {
                services: options.optional_services.clone(),
            }
        };

        info!("Scanning {:?} for nearby devices", self.discovery_window);
        adapter.start_scan(filter).await.map_err(Error::Bluetooth)?;
        tokio::time::sleep(self.discovery_window).await;
        let peripherals = adapter.peripherals().await;
        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop discovery: {}", e);
        }
        let peripherals = peripherals.map_err(Error::Bluetooth)?;

        let mut candidates = Vec::new();
        let mut by_id = HashMap::new();
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                _ => continue,
            };

            let candidate = DeviceCandidate {
                identifier: peripheral.id().to_string(),
                name: properties.local_name.clone(),
                address: properties.address.to_string(),
                rssi: properties.rssi,
            };

            if let Some(filter) = &options.name_filter {
                let matches = candidate
                    .name
                    .as_deref()
                    .map(|n| n.contains(filter.as_str()))
                    .unwrap_or(false);
                if !matches {
                    trace!("Skipping {} (name filter)", candidate.display_name());
                    continue;
                }
            }

            by_id.insert(candidate.identifier.clone(), peripheral);
            candidates.push(candidate);
        }

        sort_by_signal(&mut candidates);
        debug!("{} candidate devices", candidates.len());

        let candidate = self
            .selector
            .select(&candidates)
            .await
            .and_then(|i| candidates.get(i))
            .ok_or(Error::NoDeviceSelected)?;
        let peripheral = by_id
            .remove(&candidate.identifier)
            .ok_or(Error::NoDeviceSelected)?;

        info!("Bluetooth device selected: {}", candidate.display_name());

        Ok(Arc::new(BtleplugDevice::new(
            adapter.clone(),
            peripheral,
            candidate.name.clone(),
        )))
    }
}
