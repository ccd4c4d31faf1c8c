//! Image acquisition
//!
//! Turns one of the three input kinds (local file, URL, built-in sample)
//! into a decoded RGB image. Every failure is caught here and surfaced as a
//! single user-visible warning; a failed acquisition never reaches the OCR
//! engine or the annotation pipeline.

use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::config::AcquireSettings;

/// Where the next image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A local JPEG/PNG file.
    Upload(PathBuf),
    /// A remote image fetched over HTTP(S).
    Url(String),
    /// One of the built-in sample images, by name.
    Sample(String),
}

impl ImageSource {
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Upload(path) => format!("file {}", path.display()),
            ImageSource::Url(url) => format!("URL {url}"),
            ImageSource::Sample(name) => format!("sample \"{name}\""),
        }
    }
}

/// Why an acquisition failed. The kinds are distinguished for the logs;
/// users see one uniform warning via [`AcquireError::notice`].
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("could not read the file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not fetch the image: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not set up the image fetch: {0}")]
    FetchSetup(std::io::Error),
    #[error("the image host answered with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("could not decode the image data: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no built-in sample named {0:?}")]
    UnknownSample(String),
}

impl AcquireError {
    /// The single warning line shown to the user.
    pub fn notice(&self) -> String {
        format!("Could not load the image: {self}.")
    }
}

/// Acquire and decode an image from the given source.
pub fn acquire(source: &ImageSource, settings: &AcquireSettings) -> Result<RgbImage, AcquireError> {
    let result = match source {
        ImageSource::Upload(path) => {
            let bytes = std::fs::read(path)?;
            decode(&bytes)
        }
        ImageSource::Url(url) => {
            let bytes = fetch(url, settings)?;
            decode(&bytes)
        }
        ImageSource::Sample(name) => {
            let url = settings
                .samples
                .iter()
                .find(|sample| sample.name == *name)
                .map(|sample| sample.url.clone())
                .ok_or_else(|| AcquireError::UnknownSample(name.clone()))?;
            let bytes = fetch(&url, settings)?;
            decode(&bytes)
        }
    };

    match &result {
        Ok(image) => info!(
            "Acquired {} ({}x{})",
            source.describe(),
            image.width(),
            image.height()
        ),
        Err(err) => warn!("Acquisition of {} failed: {}", source.describe(), err),
    }
    result
}

fn decode(bytes: &[u8]) -> Result<RgbImage, AcquireError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Blocking HTTP GET with the configured timeout.
fn fetch(url: &str, settings: &AcquireSettings) -> Result<Vec<u8>, AcquireError> {
    let rt = Runtime::new().map_err(AcquireError::FetchSetup)?;
    rt.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.http_timeout_secs))
            .build()?;

        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AcquireError::HttpStatus(response.status()));
        }

        Ok(response.bytes().await?.to_vec())
    })
}
