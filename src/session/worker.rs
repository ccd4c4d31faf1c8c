//! Background scan worker
//!
//! Acquisition and inference block for seconds, so they run on a dedicated
//! thread. The UI sends at most one source at a time and polls for the
//! resulting session event each frame.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::acquire::ImageSource;
use crate::config::AppConfig;
use crate::scan::{self, ScanError};
use crate::session::SessionEvent;

/// Handle to the scan thread. Dropping it closes the request channel and
/// lets the thread exit.
pub struct ScanWorker {
    request_tx: Sender<ImageSource>,
    event_rx: Receiver<SessionEvent>,
}

impl ScanWorker {
    /// Start the worker thread with its own copy of the configuration.
    pub fn spawn(config: AppConfig) -> Self {
        let (request_tx, request_rx) = unbounded::<ImageSource>();
        let (event_tx, event_rx) = unbounded::<SessionEvent>();

        std::thread::spawn(move || run_loop(request_rx, event_tx, config));

        Self {
            request_tx,
            event_rx,
        }
    }

    /// Queue a scan. The session guards against more than one in flight.
    pub fn request_scan(&self, source: ImageSource) {
        if self.request_tx.send(source).is_err() {
            warn!("Scan worker is gone, dropping request");
        }
    }

    /// Non-blocking: the next finished event, if one is waiting.
    pub fn poll(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }
}

fn run_loop(
    request_rx: Receiver<ImageSource>,
    event_tx: Sender<SessionEvent>,
    config: AppConfig,
) {
    info!("Scan worker started");
    for source in request_rx.iter() {
        let event = match scan::scan_source(&source, &config) {
            Ok(report) => SessionEvent::ScanFinished(report),
            Err(err @ ScanError::Acquire(_)) => SessionEvent::AcquireFailed {
                notice: err.notice(),
            },
            Err(err @ ScanError::Engine(_)) => SessionEvent::ScanFailed {
                notice: err.notice(),
            },
        };
        if event_tx.send(event).is_err() {
            break;
        }
    }
    info!("Scan worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn failed_acquisition_comes_back_as_an_event() {
        let worker = ScanWorker::spawn(AppConfig::default());
        worker.request_scan(ImageSource::Upload(PathBuf::from("/nonexistent/p.jpg")));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let event = loop {
            if let Some(event) = worker.poll() {
                break event;
            }
            assert!(std::time::Instant::now() < deadline, "worker never answered");
            std::thread::sleep(Duration::from_millis(10));
        };

        match event {
            SessionEvent::AcquireFailed { notice } => {
                assert!(notice.starts_with("Could not load the image"));
            }
            _ => panic!("expected an acquisition failure event"),
        }
    }

    #[test]
    fn poll_is_non_blocking_when_idle() {
        let worker = ScanWorker::spawn(AppConfig::default());
        assert!(worker.poll().is_none());
    }
}
