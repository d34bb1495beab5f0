//! Scanner status presentation.
//!
//! Maps the scanner state onto the three UI elements the attendance page
//! exposes: the start button, the stop button and the status panel. The
//! mapping is pure; rendering is left to a [`StatusPresenter`].

use tracing::error;

/// Element id of the start-scan button.
pub const START_BUTTON_ID: &str = "startScanBtn";
/// Element id of the stop-scan button.
pub const STOP_BUTTON_ID: &str = "stopScanBtn";
/// Element id of the status panel.
pub const STATUS_PANEL_ID: &str = "scanStatus";

/// Scanner state as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Connected and polling.
    Connected {
        /// Name of the connected device, if it advertised one.
        device_name: Option<String>,
    },
    /// Starting the scan failed.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Not scanning.
    Stopped,
}

/// Styling of the status panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    /// Scan running.
    Active,
    /// Scan failed.
    Error,
}

/// Status panel content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPanel {
    /// Styling.
    pub kind: PanelKind,
    /// Lines of text, in order.
    pub lines: Vec<String>,
}

/// What each element should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    /// Whether the start button is visible.
    pub start_visible: bool,
    /// Whether the stop button is visible.
    pub stop_visible: bool,
    /// Panel content; `None` clears the panel.
    pub panel: Option<StatusPanel>,
}

impl From<&ScanStatus> for StatusView {
    fn from(status: &ScanStatus) -> Self {
        match status {
            ScanStatus::Connected { device_name } => Self {
                start_visible: false,
                stop_visible: true,
                panel: Some(StatusPanel {
                    kind: PanelKind::Active,
                    lines: vec![
                        format!(
                            "Connected to device: {}",
                            device_name.as_deref().unwrap_or("Unknown Device")
                        ),
                        "Scanning for attendance beacons...".to_string(),
                    ],
                }),
            },
            ScanStatus::Error { message } => Self {
                start_visible: true,
                stop_visible: false,
                panel: Some(StatusPanel {
                    kind: PanelKind::Error,
                    lines: vec![format!("Error: {}", message), "Please try again".to_string()],
                }),
            },
            ScanStatus::Stopped => Self {
                start_visible: true,
                stop_visible: false,
                panel: None,
            },
        }
    }
}

/// Renders scanner state.
pub trait StatusPresenter: Send + Sync {
    /// Apply a view to the three elements.
    fn render(&self, view: &StatusView);

    /// Put `text` into the element with `element_id`.
    ///
    /// Returns `false` when there is no such element.
    fn show_message(&self, _element_id: &str, _text: &str) -> bool {
        false
    }
}

/// Presenter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresenter;

impl StatusPresenter for NoopPresenter {
    fn render(&self, _view: &StatusView) {}
}

/// Prints the status panel to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresenter;

impl ConsolePresenter {
    /// Terminal lines for `view`, one per element, keyed by element id.
    pub fn lines(view: &StatusView) -> Vec<String> {
        let shown = |visible: bool| if visible { "shown" } else { "hidden" };
        let mut lines = vec![
            format!("[{}] {}", START_BUTTON_ID, shown(view.start_visible)),
            format!("[{}] {}", STOP_BUTTON_ID, shown(view.stop_visible)),
        ];

        match &view.panel {
            Some(panel) => {
                let marker = match panel.kind {
                    PanelKind::Active => "*",
                    PanelKind::Error => "x",
                };
                lines.extend(
                    panel
                        .lines
                        .iter()
                        .map(|line| format!("[{}] {} {}", STATUS_PANEL_ID, marker, line)),
                );
            }
            None => lines.push(format!("[{}] cleared", STATUS_PANEL_ID)),
        }
        lines
    }
}

impl StatusPresenter for ConsolePresenter {
    fn render(&self, view: &StatusView) {
        for line in Self::lines(view) {
            println!("{}", line);
        }
    }

    fn show_message(&self, element_id: &str, text: &str) -> bool {
        println!("[{}] {}", element_id, text);
        true
    }
}

/// Show `error` in the element `element_id`, or log it if that element
/// does not exist.
pub fn handle_error(
    presenter: &dyn StatusPresenter,
    error: &dyn std::error::Error,
    element_id: &str,
) {
    if !presenter.show_message(element_id, &error.to_string()) {
        error!("{}", error);
    }
}
