//! User notification interface.
//!
//! Failures and attendance results are surfaced to the user at the point
//! they are detected. The host decides how: a dialog, a terminal line, a
//! desktop notification.

use tracing::info;

/// Message shown when the connected device drops out of a scan.
pub const DISCONNECTED_MESSAGE: &str = "Bluetooth device disconnected. Please reconnect.";

/// Message shown after the server accepts an attendance report.
pub const ATTENDANCE_MARKED_MESSAGE: &str = "Attendance marked successfully!";

/// Receives user-facing messages.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Show a message to the user.
    fn notify(&self, message: &str);
}

impl<F> Notifier for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

/// Prints notifications to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) {
        println!("[!] {}", message);
    }
}

/// Routes notifications into the log, for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "lecturer_beacon::notify", "{}", message);
    }
}
