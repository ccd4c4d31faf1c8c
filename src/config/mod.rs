//! Application Configuration
//!
//! User settings stored in TOML format in the per-user config directory.
//! The annotation pipeline itself reads no environment variables; all
//! tuning lives here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ocr::LanguagePack;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Image acquisition settings
    pub acquire: AcquireSettings,
    /// Annotation drawing settings
    pub annotate: AnnotateSettings,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Language pack the engine is constructed with (process-wide, not
    /// per-request)
    pub language: LanguagePack,
    /// Detections at or below this confidence are discarded
    pub confidence_threshold: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: LanguagePack::English,
            confidence_threshold: 0.4,
        }
    }
}

/// One built-in sample image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleImage {
    pub name: String,
    pub url: String,
}

/// Image acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireSettings {
    /// Timeout for fetching a remote image, in seconds
    pub http_timeout_secs: u64,
    /// Built-in sample images offered in the picker
    pub samples: Vec<SampleImage>,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            samples: vec![
                SampleImage {
                    name: "german-plate".to_string(),
                    url: "https://upload.wikimedia.org/wikipedia/commons/0/03/German_license_plate_scheme_2017.jpg".to_string(),
                },
                SampleImage {
                    name: "thai-plate".to_string(),
                    url: "https://upload.wikimedia.org/wikipedia/commons/5/52/Thai_temporary_license_plate.jpg".to_string(),
                },
                SampleImage {
                    name: "us-plate".to_string(),
                    url: "https://upload.wikimedia.org/wikipedia/commons/e/e0/California_license_plate_sample.png".to_string(),
                },
            ],
        }
    }
}

/// Annotation drawing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateSettings {
    /// Outline and label color, RGB
    pub box_color: [u8; 3],
    /// Outline thickness in pixels
    pub line_thickness: u32,
    /// Draw the 1-based index next to each box
    pub draw_index_labels: bool,
    /// Label height in pixels
    pub label_scale: f32,
    /// Preferred label font; system fonts and a built-in fallback are used
    /// when unset or unloadable
    pub font_path: Option<PathBuf>,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0],
            line_thickness: 3,
            draw_index_labels: true,
            label_scale: 24.0,
            font_path: None,
        }
    }
}

impl AnnotateSettings {
    pub fn color(&self) -> image::Rgb<u8> {
        image::Rgb(self.box_color)
    }
}

/// Get the application data directory (the model cache lives here)
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "platescan", "PlateScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "platescan", "PlateScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
