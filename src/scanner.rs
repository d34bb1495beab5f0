//! Lecturer-beacon scanner.
//!
//! Connects to a user-selected peripheral, polls its name characteristic on
//! a fixed interval and reports attendance for every new `LECTURER_<id>`
//! beacon it sees. Each beacon id is reported at most once per session: the
//! id is recorded before the report is sent, so a failed report is not
//! retried.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::api::{ApiClient, RequestOptions};
use crate::ble::{
    BluetoothBackend, ConnectionEvent, ConnectionState, GattDevice, RequestDeviceOptions,
    BEACON_SERVICE_UUID, DEVICE_NAME_CHARACTERISTIC_UUID,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{Notifier, ATTENDANCE_MARKED_MESSAGE, DISCONNECTED_MESSAGE};
use crate::presenter::{ScanStatus, StatusPresenter, StatusView};

/// Endpoint attendance reports are posted to.
pub const ATTENDANCE_ENDPOINT: &str = "/bluetooth/mark-attendance";

/// Device-name prefix that marks a lecturer beacon.
pub const BEACON_PREFIX: &str = "LECTURER_";

/// Default interval between beacon polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Body of an attendance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkAttendanceRequest {
    /// The beacon identifier.
    pub beacon_id: String,
}

/// Extract the beacon id from a device name.
///
/// The id is everything after the prefix, underscores included.
pub fn parse_beacon_id(device_name: &str) -> Option<&str> {
    device_name
        .strip_prefix(BEACON_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Decode a raw characteristic value as a device name.
pub fn decode_device_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

/// Result of one poll of the connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new beacon was seen and a report was attempted.
    Reported {
        /// The beacon id.
        beacon_id: String,
        /// Whether the server accepted the report.
        accepted: bool,
    },
    /// The beacon was already reported in this session.
    AlreadyReported {
        /// The beacon id.
        beacon_id: String,
    },
    /// The device name is not a beacon name.
    NotABeacon {
        /// The decoded name.
        device_name: String,
    },
}

/// Poll task and disconnect listener of an active scan.
struct ScanTimer {
    stop_tx: watch::Sender<bool>,
    poll_handle: tokio::task::JoinHandle<()>,
    listener_handle: tokio::task::JoinHandle<()>,
}

impl ScanTimer {
    /// Signal both tasks to finish. Tasks exit at their next await point.
    fn stop(self) {
        let _ = self.stop_tx.send(true);
        drop(self.poll_handle);
        drop(self.listener_handle);
    }
}

/// Mutable state of one scanning session.
#[derive(Default)]
pub struct ScanSession {
    discovered: HashSet<String>,
    device: Option<Arc<dyn GattDevice>>,
    timer: Option<ScanTimer>,
    last_error: Option<String>,
}

impl ScanSession {
    /// A fresh session with nothing discovered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a device is held and the poll timer is running.
    pub fn is_active(&self) -> bool {
        self.device.is_some() || self.timer.is_some()
    }

    /// Whether `beacon_id` was already seen in this session.
    pub fn has_discovered(&self, beacon_id: &str) -> bool {
        self.discovered.contains(beacon_id)
    }

    /// Record `beacon_id`; returns `true` if it was new.
    pub fn record(&mut self, beacon_id: &str) -> bool {
        self.discovered.insert(beacon_id.to_string())
    }

    /// Take the device and timer out of the session.
    fn detach(&mut self) -> (Option<ScanTimer>, Option<Arc<dyn GattDevice>>) {
        (self.timer.take(), self.device.take())
    }
}

struct ScannerInner {
    backend: Option<Arc<dyn BluetoothBackend>>,
    api: Arc<ApiClient>,
    notifier: Arc<dyn Notifier>,
    presenter: Arc<dyn StatusPresenter>,
    poll_interval: Duration,
    name_filter: Option<String>,
    session: Mutex<ScanSession>,
}

/// Beacon scanner. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct BeaconScanner {
    inner: Arc<ScannerInner>,
}

impl BeaconScanner {
    /// Create a scanner.
    ///
    /// `backend` is `None` on hosts without Bluetooth support.
    pub fn new(
        backend: Option<Arc<dyn BluetoothBackend>>,
        api: Arc<ApiClient>,
        notifier: Arc<dyn Notifier>,
        presenter: Arc<dyn StatusPresenter>,
    ) -> Self {
        Self::with_config(backend, api, notifier, presenter, &Config::default())
    }

    /// Create a scanner using the poll interval and name filter from `config`.
    pub fn with_config(
        backend: Option<Arc<dyn BluetoothBackend>>,
        api: Arc<ApiClient>,
        notifier: Arc<dyn Notifier>,
        presenter: Arc<dyn StatusPresenter>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                backend,
                api,
                notifier,
                presenter,
                poll_interval: config.poll_interval(),
                name_filter: config.device_name_filter.clone(),
                session: Mutex::new(ScanSession::new()),
            }),
        }
    }

    /// Select a device, connect to it and start polling.
    ///
    /// On failure the presenter shows the error, the user is notified and
    /// the error is returned; scanning does not start.
    pub async fn start_bluetooth_scan(&self) -> Result<()> {
        info!("Starting Bluetooth scan");

        let device = match self.connect_device().await {
            Ok(device) => device,
            Err(e) => {
                error!("Error starting Bluetooth scan: {}", e);
                self.inner.session.lock().last_error = Some(e.to_string());
                self.present(ScanStatus::Error {
                    message: e.to_string(),
                });
                self.inner
                    .notifier
                    .notify(&format!("Failed to start Bluetooth scanning: {}", e));
                return Err(e);
            }
        };

        // Subscribe before the timer exists so an immediate drop is not missed.
        let events = device.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let device_name = device.name();

        let (stale_timer, stale_device) = {
            // Tasks spawned under the lock see the session fully populated.
            let mut session = self.inner.session.lock();
            // An overlapping start may have installed its own scan meanwhile.
            let stale = session.detach();
            let poll_handle = tokio::spawn(run_poll_loop(
                weak.clone(),
                stop_rx.clone(),
                self.inner.poll_interval,
            ));
            let listener_handle = tokio::spawn(watch_disconnect(weak, events, stop_rx));
            session.device = Some(device);
            session.timer = Some(ScanTimer {
                stop_tx,
                poll_handle,
                listener_handle,
            });
            stale
        };

        if release(stale_timer, stale_device).await {
            debug!("Released scan installed by an overlapping start");
        }

        self.present(ScanStatus::Connected { device_name });
        Ok(())
    }

    async fn connect_device(&self) -> Result<Arc<dyn GattDevice>> {
        let backend = match &self.inner.backend {
            Some(backend) if backend.is_available().await => backend.clone(),
            _ => return Err(Error::BluetoothUnavailable),
        };

        if self.teardown().await {
            debug!("Replaced previous scan");
        }

        let options =
            RequestDeviceOptions::beacon().with_name_filter(self.inner.name_filter.clone());
        let device = backend.request_device(&options).await?;
        debug!("Bluetooth device selected: {}", device.id());

        device.connect().await?;
        info!(
            "Connected to device {}",
            device.name().as_deref().unwrap_or("<unnamed>")
        );
        Ok(device)
    }

    /// Read the connected device's name and report attendance for a new beacon.
    pub async fn scan_for_beacons(&self) -> Result<PollOutcome> {
        let device = self
            .inner
            .session
            .lock()
            .device
            .clone()
            .ok_or(Error::NoDeviceConnected)?;

        debug!("Scanning for beacons");
        let raw = device
            .read_characteristic(BEACON_SERVICE_UUID, DEVICE_NAME_CHARACTERISTIC_UUID)
            .await?;
        trace!("Raw device name: {:02x?}", raw);
        let device_name = decode_device_name(&raw);
        debug!("Device name read: {}", device_name);

        let Some(beacon_id) = parse_beacon_id(&device_name) else {
            return Ok(PollOutcome::NotABeacon { device_name });
        };
        let beacon_id = beacon_id.to_string();

        if !self.inner.session.lock().record(&beacon_id) {
            debug!("Beacon already discovered: {}", beacon_id);
            return Ok(PollOutcome::AlreadyReported { beacon_id });
        }

        info!("New beacon discovered: {}", beacon_id);
        let accepted = self.mark_attendance(&beacon_id).await.is_ok();
        Ok(PollOutcome::Reported {
            beacon_id,
            accepted,
        })
    }

    /// One timer tick: poll, then apply the error policy.
    ///
    /// A disconnect ends the scan; any other error is logged and the next
    /// tick runs as usual.
    pub async fn poll_tick(&self) {
        match self.scan_for_beacons().await {
            Ok(outcome) => trace!("Poll finished: {:?}", outcome),
            Err(e) if e.is_disconnect() => {
                warn!("Device disconnected during poll: {}", e);
                self.handle_disconnect().await;
            }
            Err(e) => warn!("Error scanning for beacons: {}", e),
        }
    }

    /// Stop polling and disconnect. Safe to call at any time, any number of times.
    pub async fn stop_bluetooth_scan(&self) {
        info!("Stopping Bluetooth scan");
        self.teardown().await;
        self.present(ScanStatus::Stopped);
    }

    /// Report attendance for `beacon_id`.
    ///
    /// The user is told whether it worked. There is no retry.
    pub async fn mark_attendance(&self, beacon_id: &str) -> Result<Value> {
        info!("Marking attendance for beacon {}", beacon_id);

        let result = match RequestOptions::post().json_body(&MarkAttendanceRequest {
            beacon_id: beacon_id.to_string(),
        }) {
            Ok(options) => self.inner.api.request(ATTENDANCE_ENDPOINT, options).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                info!("Attendance marked for beacon {}", beacon_id);
                self.inner.notifier.notify(ATTENDANCE_MARKED_MESSAGE);
            }
            Err(e) => {
                warn!("Error marking attendance for {}: {}", beacon_id, e);
                self.inner
                    .notifier
                    .notify(&format!("Failed to mark attendance: {}", e));
            }
        }
        result
    }

    /// Stop scanning and forget every discovered beacon.
    pub async fn reset_session(&self) {
        self.stop_bluetooth_scan().await;
        *self.inner.session.lock() = ScanSession::new();
        debug!("Scan session reset");
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.inner.session.lock().is_active()
    }

    /// Whether `beacon_id` was seen in this session.
    pub fn has_discovered(&self, beacon_id: &str) -> bool {
        self.inner.session.lock().has_discovered(beacon_id)
    }

    /// Beacon ids seen in this session, sorted.
    pub fn discovered_beacons(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.session.lock().discovered.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Message of the last failed scan start.
    pub fn last_error(&self) -> Option<String> {
        self.inner.session.lock().last_error.clone()
    }

    /// Release the timer and device. Returns whether anything was active.
    async fn teardown(&self) -> bool {
        let (timer, device) = self.inner.session.lock().detach();
        release(timer, device).await
    }

    /// Stop after an unsolicited disconnect and tell the user, once.
    async fn handle_disconnect(&self) {
        if self.teardown().await {
            self.present(ScanStatus::Stopped);
            self.inner.notifier.notify(DISCONNECTED_MESSAGE);
        }
    }

    fn present(&self, status: ScanStatus) {
        debug!("Scan status: {:?}", status);
        self.inner.presenter.render(&StatusView::from(&status));
    }
}

impl std::fmt::Debug for BeaconScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconScanner")
            .field("poll_interval", &self.inner.poll_interval)
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

/// Stop the timer, then disconnect the device. Returns whether either existed.
async fn release(timer: Option<ScanTimer>, device: Option<Arc<dyn GattDevice>>) -> bool {
    let was_active = timer.is_some() || device.is_some();

    if let Some(timer) = timer {
        timer.stop();
        debug!("Scan timer cleared");
    }

    if let Some(device) = device {
        if let Err(e) = device.disconnect().await {
            warn!("Error disconnecting {}: {}", device.id(), e);
        }
    }

    was_active
}

/// Poll on a fixed interval until stopped. The first poll happens one full
/// interval after the start.
async fn run_poll_loop(
    scanner: Weak<ScannerInner>,
    mut stop_rx: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = scanner.upgrade() else { break };
                BeaconScanner { inner }.poll_tick().await;
            }
        }
    }

    debug!("Poll loop ended");
}

/// Stop the scan when the device reports a disconnect.
async fn watch_disconnect(
    scanner: Weak<ScannerInner>,
    mut events: broadcast::Receiver<ConnectionEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent { state: ConnectionState::Disconnected, identifier }) => {
                    info!("Device {} disconnected", identifier);
                    if let Some(inner) = scanner.upgrade() {
                        BeaconScanner { inner }.handle_disconnect().await;
                    }
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Missed {} connection events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!("Disconnect listener ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{guard_with_token, FakeTransport};
    use crate::presenter::PanelKind;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FakeDevice {
        name: Option<String>,
        value: Mutex<std::result::Result<Vec<u8>, fn() -> Error>>,
        state: Mutex<ConnectionState>,
        connect_calls: AtomicUsize,
        disconnect_calls: AtomicUsize,
        events: broadcast::Sender<ConnectionEvent>,
    }

    impl FakeDevice {
        fn new(name: &str) -> Arc<Self> {
            let (events, _) = broadcast::channel(8);
            Arc::new(Self {
                name: Some("Room 101".to_string()),
                value: Mutex::new(Ok(name.as_bytes().to_vec())),
                state: Mutex::new(ConnectionState::Disconnected),
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
                events,
            })
        }

        fn advertise(&self, name: &str) {
            *self.value.lock() = Ok(name.as_bytes().to_vec());
        }

        fn fail_reads(&self, error: fn() -> Error) {
            *self.value.lock() = Err(error);
        }

        fn drop_connection(&self) {
            *self.state.lock() = ConnectionState::Disconnected;
            let _ = self.events.send(ConnectionEvent {
                identifier: "fake".to_string(),
                state: ConnectionState::Disconnected,
            });
        }
    }

    #[async_trait]
    impl GattDevice for FakeDevice {
        fn id(&self) -> String {
            "fake".to_string()
        }

        fn name(&self) -> Option<String> {
            self.name.clone()
        }

        async fn connect(&self) -> Result<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent starts a chance to interleave.
            tokio::task::yield_now().await;
            *self.state.lock() = ConnectionState::Connected;
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = ConnectionState::Disconnected;
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
            assert_eq!(service, BEACON_SERVICE_UUID);
            assert_eq!(characteristic, DEVICE_NAME_CHARACTERISTIC_UUID);
            match &*self.value.lock() {
                Ok(bytes) => Ok(bytes.clone()),
                Err(make) => Err(make()),
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
            self.events.subscribe()
        }
    }

    struct FakeBackend {
        available: bool,
        devices: Vec<Arc<FakeDevice>>,
        requests: AtomicUsize,
        fail_with: Option<fn() -> Error>,
    }

    impl FakeBackend {
        fn new(device: Arc<FakeDevice>) -> Arc<Self> {
            Self::build(device, true, None)
        }

        fn build(
            device: Arc<FakeDevice>,
            available: bool,
            fail_with: Option<fn() -> Error>,
        ) -> Arc<Self> {
            Self::offering(vec![device], available, fail_with)
        }

        /// Hands out `devices` in order, repeating the last one.
        fn offering(
            devices: Vec<Arc<FakeDevice>>,
            available: bool,
            fail_with: Option<fn() -> Error>,
        ) -> Arc<Self> {
            Arc::new(Self {
                available,
                devices,
                requests: AtomicUsize::new(0),
                fail_with,
            })
        }
    }

    #[async_trait]
    impl BluetoothBackend for FakeBackend {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn request_device(
            &self,
            options: &RequestDeviceOptions,
        ) -> Result<Arc<dyn GattDevice>> {
            assert!(options.optional_services.contains(&BEACON_SERVICE_UUID));
            let n = self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            let device = &self.devices[n.min(self.devices.len() - 1)];
            Ok(device.clone())
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        views: Mutex<Vec<StatusView>>,
    }

    impl RecordingPresenter {
        fn last(&self) -> Option<StatusView> {
            self.views.lock().last().cloned()
        }
    }

    impl StatusPresenter for RecordingPresenter {
        fn render(&self, view: &StatusView) {
            self.views.lock().push(view.clone());
        }
    }

    struct Harness {
        scanner: BeaconScanner,
        transport: Arc<FakeTransport>,
        presenter: Arc<RecordingPresenter>,
        notes: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(backend: Option<Arc<dyn BluetoothBackend>>) -> Self {
            let transport = Arc::new(FakeTransport::default());
            let notes = Arc::new(Mutex::new(Vec::new()));
            let sink = notes.clone();
            let notifier: Arc<dyn Notifier> =
                Arc::new(move |m: &str| sink.lock().push(m.to_string()));
            let api = Arc::new(ApiClient::with_transport(
                "http://localhost:8000",
                guard_with_token(Some("student-token")),
                notifier.clone(),
                transport.clone(),
            ));
            let presenter = Arc::new(RecordingPresenter::default());
            let scanner = BeaconScanner::new(backend, api, notifier, presenter.clone());

            Self {
                scanner,
                transport,
                presenter,
                notes,
            }
        }

        fn attendance_posts(&self) -> Vec<String> {
            self.transport
                .requests
                .lock()
                .iter()
                .filter(|r| r.url.ends_with(ATTENDANCE_ENDPOINT))
                .map(|r| r.body.clone().unwrap_or_default())
                .collect()
        }

        fn notes(&self) -> Vec<String> {
            self.notes.lock().clone()
        }
    }

    #[test]
    fn test_parse_beacon_id() {
        assert_eq!(parse_beacon_id("LECTURER_42"), Some("42"));
        assert_eq!(parse_beacon_id("LECTURER_7_12_1700000000"), Some("7_12_1700000000"));
        assert_eq!(parse_beacon_id("LECTURER_"), None);
        assert_eq!(parse_beacon_id("lecturer_42"), None);
        assert_eq!(parse_beacon_id("STUDENT_42"), None);
        assert_eq!(parse_beacon_id(""), None);
    }

    #[test]
    fn test_decode_device_name() {
        assert_eq!(decode_device_name(b"LECTURER_9\0\0"), "LECTURER_9");
        assert_eq!(decode_device_name(&[0x4c, 0xff, 0x41]), "L\u{fffd}A");
    }

    #[test]
    fn test_session_record_is_at_most_once() {
        let mut session = ScanSession::new();
        assert!(session.record("7"));
        assert!(!session.record("7"));
        assert!(session.has_discovered("7"));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_start_without_bluetooth_never_prompts() {
        let device = FakeDevice::new("LECTURER_1");
        let backend = FakeBackend::build(device, false, None);
        let h = Harness::new(Some(backend.clone()));

        let err = h.scanner.start_bluetooth_scan().await.unwrap_err();

        assert!(matches!(err, Error::BluetoothUnavailable));
        assert_eq!(backend.requests.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.notes(),
            ["Failed to start Bluetooth scanning: Bluetooth is not supported on this platform"
                .to_string()]
        );
        assert_eq!(
            h.scanner.last_error().as_deref(),
            Some("Bluetooth is not supported on this platform")
        );
        let view = h.presenter.last().unwrap();
        assert!(view.start_visible);
        assert_eq!(view.panel.unwrap().kind, PanelKind::Error);
        assert!(!h.scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_start_with_no_backend_is_unsupported() {
        let h = Harness::new(None);
        let err = h.scanner.start_bluetooth_scan().await.unwrap_err();
        assert!(matches!(err, Error::BluetoothUnavailable));
    }

    #[tokio::test]
    async fn test_cancelled_chooser_reports_error() {
        let device = FakeDevice::new("LECTURER_1");
        let backend = FakeBackend::build(device.clone(), true, Some(|| Error::NoDeviceSelected));
        let h = Harness::new(Some(backend));

        assert!(h.scanner.start_bluetooth_scan().await.is_err());
        assert_eq!(device.connect_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.notes(),
            ["Failed to start Bluetooth scanning: No Bluetooth device selected".to_string()]
        );
    }

    #[tokio::test]
    async fn test_start_connects_and_presents() {
        let device = FakeDevice::new("LECTURER_1");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));

        h.scanner.start_bluetooth_scan().await.unwrap();

        assert!(h.scanner.is_scanning());
        assert_eq!(device.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.presenter.last(),
            Some(StatusView::from(&ScanStatus::Connected {
                device_name: Some("Room 101".to_string())
            }))
        );

        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_scan_without_device_fails() {
        let h = Harness::new(None);
        let err = h.scanner.scan_for_beacons().await.unwrap_err();
        assert!(matches!(err, Error::NoDeviceConnected));
    }

    #[tokio::test]
    async fn test_beacon_reported_exactly_once() {
        let device = FakeDevice::new("LECTURER_7_12_1700000000");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));
        h.scanner.start_bluetooth_scan().await.unwrap();

        let first = h.scanner.scan_for_beacons().await.unwrap();
        let second = h.scanner.scan_for_beacons().await.unwrap();

        assert_eq!(
            first,
            PollOutcome::Reported {
                beacon_id: "7_12_1700000000".to_string(),
                accepted: true
            }
        );
        assert_eq!(
            second,
            PollOutcome::AlreadyReported {
                beacon_id: "7_12_1700000000".to_string()
            }
        );
        assert_eq!(
            h.attendance_posts(),
            [r#"{"beacon_id":"7_12_1700000000"}"#.to_string()]
        );
        assert_eq!(h.notes(), [ATTENDANCE_MARKED_MESSAGE.to_string()]);

        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_non_beacon_name_is_ignored() {
        let device = FakeDevice::new("JBL Flip 5");
        let h = Harness::new(Some(FakeBackend::new(device)));
        h.scanner.start_bluetooth_scan().await.unwrap();

        let outcome = h.scanner.scan_for_beacons().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::NotABeacon {
                device_name: "JBL Flip 5".to_string()
            }
        );
        assert!(h.attendance_posts().is_empty());
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_failed_report_is_not_retried() {
        let device = FakeDevice::new("LECTURER_3");
        let h = Harness::new(Some(FakeBackend::new(device)));
        h.transport.respond(400, r#"{"detail": "Bluetooth beacon has expired"}"#);
        h.scanner.start_bluetooth_scan().await.unwrap();

        let first = h.scanner.scan_for_beacons().await.unwrap();
        let second = h.scanner.scan_for_beacons().await.unwrap();

        assert_eq!(
            first,
            PollOutcome::Reported {
                beacon_id: "3".to_string(),
                accepted: false
            }
        );
        assert!(matches!(second, PollOutcome::AlreadyReported { .. }));
        assert_eq!(h.attendance_posts().len(), 1);
        assert_eq!(
            h.notes(),
            [
                "Bluetooth beacon has expired".to_string(),
                "Failed to mark attendance: Bluetooth beacon has expired".to_string(),
            ]
        );
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let device = FakeDevice::new("LECTURER_1");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));

        // Stopping before anything started is harmless.
        h.scanner.stop_bluetooth_scan().await;

        h.scanner.start_bluetooth_scan().await.unwrap();
        h.scanner.stop_bluetooth_scan().await;
        h.scanner.stop_bluetooth_scan().await;

        assert_eq!(device.disconnect_calls.load(Ordering::SeqCst), 1);
        assert!(!h.scanner.is_scanning());
        assert_eq!(h.presenter.last(), Some(StatusView::from(&ScanStatus::Stopped)));
        assert!(h.notes().is_empty());
    }

    #[tokio::test]
    async fn test_discovered_set_survives_restart_until_reset() {
        let device = FakeDevice::new("LECTURER_5");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));

        h.scanner.start_bluetooth_scan().await.unwrap();
        h.scanner.scan_for_beacons().await.unwrap();
        h.scanner.stop_bluetooth_scan().await;

        h.scanner.start_bluetooth_scan().await.unwrap();
        let again = h.scanner.scan_for_beacons().await.unwrap();
        assert!(matches!(again, PollOutcome::AlreadyReported { .. }));

        h.scanner.reset_session().await;
        assert!(h.scanner.discovered_beacons().is_empty());

        h.scanner.start_bluetooth_scan().await.unwrap();
        let after_reset = h.scanner.scan_for_beacons().await.unwrap();
        assert!(matches!(after_reset, PollOutcome::Reported { .. }));
        assert_eq!(h.attendance_posts().len(), 2);
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_restart_releases_previous_device() {
        let device = FakeDevice::new("LECTURER_1");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));

        h.scanner.start_bluetooth_scan().await.unwrap();
        h.scanner.start_bluetooth_scan().await.unwrap();

        assert_eq!(device.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(device.connect_calls.load(Ordering::SeqCst), 2);
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test]
    async fn test_overlapping_starts_keep_one_device() {
        let first = FakeDevice::new("LECTURER_1");
        let second = FakeDevice::new("LECTURER_2");
        let backend = FakeBackend::offering(vec![first.clone(), second.clone()], true, None);
        let h = Harness::new(Some(backend));

        let (a, b) = tokio::join!(
            h.scanner.start_bluetooth_scan(),
            h.scanner.start_bluetooth_scan()
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(first.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.connect_calls.load(Ordering::SeqCst), 1);

        // Exactly one device is still held.
        let released = first.disconnect_calls.load(Ordering::SeqCst)
            + second.disconnect_calls.load(Ordering::SeqCst);
        assert_eq!(released, 1);
        assert!(h.scanner.is_scanning());

        h.scanner.stop_bluetooth_scan().await;
        assert_eq!(first.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.disconnect_calls.load(Ordering::SeqCst), 1);
        assert!(!h.scanner.is_scanning());
        assert!(h.notes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_polls() {
        let device = FakeDevice::new("LECTURER_4");
        let mut h = Harness::new(None);
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        h.scanner = BeaconScanner::with_config(
            Some(FakeBackend::new(device)),
            h.scanner.inner.api.clone(),
            h.scanner.inner.notifier.clone(),
            h.scanner.inner.presenter.clone(),
            &config,
        );

        h.scanner.start_bluetooth_scan().await.unwrap();
        tokio::time::sleep(DEFAULT_POLL_INTERVAL + Duration::from_millis(100)).await;

        assert_eq!(h.attendance_posts(), [r#"{"beacon_id":"4"}"#.to_string()]);
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_polls_every_interval() {
        let device = FakeDevice::new("Projector");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));
        h.scanner.start_bluetooth_scan().await.unwrap();

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(h.attendance_posts().is_empty());

        device.advertise("LECTURER_11");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.attendance_posts(), [r#"{"beacon_id":"11"}"#.to_string()]);

        // Later ticks keep seeing the same beacon.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.attendance_posts().len(), 1);

        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_do_not_stop_timer() {
        let device = FakeDevice::new("LECTURER_8");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));
        device.fail_reads(|| Error::CharacteristicNotFound {
            uuid: DEVICE_NAME_CHARACTERISTIC_UUID.to_string(),
        });
        h.scanner.start_bluetooth_scan().await.unwrap();

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert!(h.scanner.is_scanning());
        assert!(h.attendance_posts().is_empty());

        device.advertise("LECTURER_8");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.attendance_posts().len(), 1);
        h.scanner.stop_bluetooth_scan().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_read_stops_scan() {
        let device = FakeDevice::new("LECTURER_8");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));
        h.scanner.start_bluetooth_scan().await.unwrap();
        device.fail_reads(|| Error::ConnectionLost);

        tokio::time::sleep(Duration::from_millis(5_100)).await;

        assert!(!h.scanner.is_scanning());
        assert_eq!(h.notes(), [DISCONNECTED_MESSAGE.to_string()]);
        assert_eq!(h.presenter.last(), Some(StatusView::from(&ScanStatus::Stopped)));
    }

    #[tokio::test]
    async fn test_disconnect_event_stops_scan_once() {
        let device = FakeDevice::new("LECTURER_2");
        let h = Harness::new(Some(FakeBackend::new(device.clone())));
        h.scanner.start_bluetooth_scan().await.unwrap();

        device.drop_connection();
        for _ in 0..10 {
            if !h.scanner.is_scanning() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!h.scanner.is_scanning());
        assert_eq!(h.notes(), [DISCONNECTED_MESSAGE.to_string()]);

        // A later explicit stop does not notify again.
        h.scanner.stop_bluetooth_scan().await;
        assert_eq!(h.notes().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_prefix_roundtrip(id in "[A-Za-z0-9_]{1,24}") {
            let name = format!("{}{}", BEACON_PREFIX, id);
            prop_assert_eq!(parse_beacon_id(&name), Some(id.as_str()));
        }

        #[test]
        fn prop_repeated_sightings_report_once(
            ids in proptest::collection::vec("[0-9]{1,3}", 1..20)
        ) {
            let mut session = ScanSession::new();
            let reports = ids.iter().filter(|id| session.record(id)).count();
            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(reports, unique.len());
        }
    }
}
