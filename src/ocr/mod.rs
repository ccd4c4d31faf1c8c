//! OCR layer
//!
//! Runs PaddleOCR text detection and recognition models through ONNX
//! Runtime. The engine is an expensive process-wide resource: it is built
//! lazily on first use and shared behind a mutex for the rest of the
//! process lifetime. Language support is fixed at construction time.

pub mod engine;
pub mod models;
pub mod session;

use anyhow::Result;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

pub use engine::OcrEngine;
pub use models::{LanguagePack, ModelFile, ModelManager};

/// Four corner points of a detected text region, ordered top-left,
/// top-right, bottom-right, bottom-left. Not necessarily axis-aligned.
pub type Quad = [(f32, f32); 4];

/// One raw output unit from the OCR engine.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Quadrilateral region in source-image coordinates.
    pub region: Quad,
    /// Transcribed text, possibly empty.
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

static ENGINE: OnceCell<Mutex<OcrEngine>> = OnceCell::new();

/// Get the process-wide OCR engine, constructing it on first call.
///
/// Construction downloads any missing model files and loads the ONNX
/// sessions, so the first call can take a while. Later calls reuse the
/// same instance; the configured language pack of the first call wins.
pub fn global_engine(config: &crate::config::OcrSettings) -> Result<&'static Mutex<OcrEngine>> {
    ENGINE.get_or_try_init(|| OcrEngine::from_settings(config).map(Mutex::new))
}
