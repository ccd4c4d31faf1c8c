//! One full scan, start to finish
//!
//! Glues acquisition, recognition, and annotation together into a single
//! blocking call. Both the desktop worker thread and the one-shot CLI mode
//! go through here so the two surfaces cannot drift apart.

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use tracing::info;

use crate::acquire::{self, AcquireError, ImageSource};
use crate::annotate::{self, AnnotateOptions, LabelFont};
use crate::config::AppConfig;
use crate::ocr;
use crate::session::ScanReport;

/// Which stage of a scan failed. Acquisition failures carry their own
/// user-facing notice; everything after acquisition is an engine failure.
pub enum ScanError {
    Acquire(AcquireError),
    Engine(anyhow::Error),
}

impl ScanError {
    /// The single warning line shown to the user.
    pub fn notice(&self) -> String {
        match self {
            ScanError::Acquire(err) => err.notice(),
            ScanError::Engine(err) => format!("Scan failed: {err:#}."),
        }
    }
}

/// Acquire an image from the given source and scan it.
pub fn scan_source(source: &ImageSource, config: &AppConfig) -> Result<ScanReport, ScanError> {
    let image = acquire::acquire(source, &config.acquire).map_err(ScanError::Acquire)?;
    scan_image(image, config).map_err(ScanError::Engine)
}

/// Run recognition and annotation on an already-decoded image.
pub fn scan_image(image: RgbImage, config: &AppConfig) -> Result<ScanReport> {
    let started = Instant::now();

    let engine = ocr::global_engine(&config.ocr)?;
    let detections = engine.lock().recognize(&image)?;

    let font = LabelFont::load(config.annotate.font_path.as_deref());
    let options = AnnotateOptions {
        confidence_threshold: config.ocr.confidence_threshold,
        box_color: config.annotate.color(),
        line_thickness: config.annotate.line_thickness,
        draw_index_labels: config.annotate.draw_index_labels,
        label_scale: config.annotate.label_scale,
        font: &font,
    };
    let (annotated, results) = annotate::annotate(&image, &detections, &options);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        "Scan finished: {} of {} detections accepted in {} ms",
        results.len(),
        detections.len(),
        elapsed_ms
    );

    Ok(ScanReport {
        original: image,
        annotated,
        results,
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn acquire_failures_keep_their_own_notice() {
        let config = AppConfig::default();
        let source = ImageSource::Upload(PathBuf::from("/nonexistent/plate.jpg"));

        let err = scan_source(&source, &config).unwrap_err();
        assert!(matches!(err, ScanError::Acquire(_)));
        assert!(err.notice().starts_with("Could not load the image"));
    }

    #[test]
    fn engine_failures_read_as_scan_failures() {
        let err = ScanError::Engine(anyhow::anyhow!("model file missing"));
        assert_eq!(err.notice(), "Scan failed: model file missing.");
    }
}
