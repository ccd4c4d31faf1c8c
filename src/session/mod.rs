//! Session state machine
//!
//! One interaction at a time moves through `NoInput -> Acquiring -> Ready`
//! (or `Error`), driven by discrete events. The renderer never inspects the
//! states directly; it asks for a [`DisplayPlan`], a plain description of
//! what to put on screen.

pub mod worker;

use tracing::debug;

use crate::acquire::ImageSource;
use crate::annotate::AcceptedResult;
use image::RgbImage;

/// Informational notice for the valid-but-empty outcome, distinct from any
/// failure warning.
pub const EMPTY_NOTICE: &str = "No high-confidence plate text detected.";

/// Everything one completed scan produced.
#[derive(Clone, Debug)]
pub struct ScanReport {
    /// The image exactly as acquired.
    pub original: RgbImage,
    /// A copy with outlines and index labels drawn on.
    pub annotated: RgbImage,
    /// Accepted results in detection order.
    pub results: Vec<AcceptedResult>,
    pub elapsed_ms: u64,
}

impl ScanReport {
    /// The model ran but nothing passed the confidence threshold.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Where the current interaction stands.
pub enum SessionState {
    /// Waiting for the user to pick an input.
    NoInput,
    /// An acquisition + scan is in flight.
    Acquiring { source: ImageSource },
    /// A scan finished; the report may be empty.
    Ready { report: ScanReport },
    /// The interaction failed; the session waits for the next input.
    Error { notice: String },
}

/// Discrete events that drive the state machine.
pub enum SessionEvent {
    SourceChosen(ImageSource),
    AcquireFailed { notice: String },
    ScanFailed { notice: String },
    ScanFinished(ScanReport),
    Cleared,
}

/// What the renderer should show, derived from the current state.
pub struct DisplayPlan<'a> {
    /// Busy indicator text while a scan is in flight.
    pub busy: Option<String>,
    /// Single warning line for a failed interaction.
    pub warning: Option<&'a str>,
    /// Informational notice (empty-result state).
    pub info: Option<&'a str>,
    /// Finished scan to render, if any.
    pub report: Option<&'a ScanReport>,
}

/// The state machine itself.
#[derive(Default)]
pub struct Session {
    state: SessionState,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::NoInput
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether a scan is in flight (inputs should be disabled).
    pub fn is_busy(&self) -> bool {
        matches!(self.state, SessionState::Acquiring { .. })
    }

    /// Advance the machine. Completion events that arrive outside of
    /// `Acquiring` are stale and dropped.
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SourceChosen(source) => {
                debug!("Session: acquiring {}", source.describe());
                self.state = SessionState::Acquiring { source };
            }
            SessionEvent::Cleared => {
                self.state = SessionState::NoInput;
            }
            SessionEvent::AcquireFailed { notice } | SessionEvent::ScanFailed { notice } => {
                if self.is_busy() {
                    self.state = SessionState::Error { notice };
                } else {
                    debug!("Session: dropping stale failure event");
                }
            }
            SessionEvent::ScanFinished(report) => {
                if self.is_busy() {
                    self.state = SessionState::Ready { report };
                } else {
                    debug!("Session: dropping stale scan result");
                }
            }
        }
    }

    /// The data contract between the machine and the renderer.
    pub fn display(&self) -> DisplayPlan<'_> {
        match &self.state {
            SessionState::NoInput => DisplayPlan {
                busy: None,
                warning: None,
                info: None,
                report: None,
            },
            SessionState::Acquiring { source } => DisplayPlan {
                busy: Some(format!("Scanning {}...", source.describe())),
                warning: None,
                info: None,
                report: None,
            },
            SessionState::Ready { report } => DisplayPlan {
                busy: None,
                warning: None,
                info: report.is_empty().then_some(EMPTY_NOTICE),
                report: Some(report),
            },
            SessionState::Error { notice } => DisplayPlan {
                busy: None,
                warning: Some(notice.as_str()),
                info: None,
                report: None,
            },
        }
    }
}
