//! Scan for a lecturer beacon and report attendance.
//!
//! Run with: cargo run --example scan_attendance
//!
//! Store a token first with the `session_tool` example.

use async_trait::async_trait;
use lecturer_beacon::{
    ApiClient, BeaconScanner, BtleplugBackend, Config, ConsoleNotifier, ConsolePresenter,
    DeviceCandidate, DeviceSelector, FileTokenStore, LogNavigator, NameFilterSelector, Result,
    SessionGuard,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Lists the nearby devices and asks which one to connect to.
struct PromptSelector;

#[async_trait]
impl DeviceSelector for PromptSelector {
    async fn select(&self, candidates: &[DeviceCandidate]) -> Option<usize> {
        if candidates.is_empty() {
            println!("No devices found nearby.");
            return None;
        }

        println!("\nNearby devices:");
        for (i, candidate) in candidates.iter().enumerate() {
            println!(
                "  [{}] {} ({:?} dBm)",
                i,
                candidate.display_name(),
                candidate.rssi
            );
        }

        let count = candidates.len();
        tokio::task::spawn_blocking(move || {
            print!("Select a device (empty to cancel): ");
            io::stdout().flush().ok()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).ok()?;
            line.trim().parse::<usize>().ok().filter(|i| *i < count)
        })
        .await
        .ok()
        .flatten()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lecturer_beacon=debug".parse().unwrap()),
        )
        .init();
    lecturer_beacon::install_panic_hook();

    let config = Config::load()?;
    let store = Arc::new(FileTokenStore::new(config.resolved_storage_path()?));
    let guard = Arc::new(SessionGuard::with_config(
        store,
        Arc::new(LogNavigator),
        &config,
    ));

    if guard.check_auth().is_none() {
        println!("Not logged in. Run: cargo run --example session_tool -- login <token>");
        return Ok(());
    }

    let notifier = Arc::new(ConsoleNotifier);
    let api = Arc::new(ApiClient::new(
        config.api_base_url.clone(),
        guard,
        notifier.clone(),
    ));

    let selector: Arc<dyn DeviceSelector> = match &config.device_name_filter {
        Some(filter) => Arc::new(NameFilterSelector::new(Some(filter.clone()))),
        None => Arc::new(PromptSelector),
    };
    let backend = BtleplugBackend::new(selector, config.discovery_window()).await;

    let scanner = BeaconScanner::with_config(
        Some(Arc::new(backend)),
        api,
        notifier,
        Arc::new(ConsolePresenter),
        &config,
    );

    println!("Looking for devices for {:?}...", config.discovery_window());
    if scanner.start_bluetooth_scan().await.is_err() {
        return Ok(());
    }

    println!("Press Ctrl+C to stop scanning.\n");
    tokio::signal::ctrl_c().await?;

    scanner.stop_bluetooth_scan().await;

    let beacons = scanner.discovered_beacons();
    println!("\nBeacons seen this session: {}", beacons.len());
    for beacon in beacons {
        println!("  {}", beacon);
    }

    Ok(())
}
