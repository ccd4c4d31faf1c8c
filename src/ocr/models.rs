//! Model management
//!
//! Handles downloading and caching of the PaddleOCR ONNX models and the
//! character dictionary the recognizer needs. Files live in the per-user
//! data directory and are fetched once, verified, and reused.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Which languages the recognizer is built for. Fixed per process: the
/// engine is constructed once with one pack and reused for every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguagePack {
    /// Latin script, English dictionary.
    #[default]
    English,
    /// Thai script plus Latin.
    ThaiEnglish,
}

impl LanguagePack {
    /// Subdirectory under the models dir holding this pack's files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            LanguagePack::English => "english",
            LanguagePack::ThaiEnglish => "thai",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LanguagePack::English => "English",
            LanguagePack::ThaiEnglish => "Thai + English",
        }
    }
}

/// One downloadable file. Detection is language-independent; recognition
/// model and dictionary come per language pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFile {
    /// Text detection model (DBNet).
    Detection,
    /// Text recognition model (CRNN/SVTR).
    Recognition(LanguagePack),
    /// Character dictionary for CTC decoding.
    Dictionary(LanguagePack),
}

impl ModelFile {
    pub fn filename(&self) -> &'static str {
        match self {
            ModelFile::Detection => "det.onnx",
            ModelFile::Recognition(_) => "rec.onnx",
            ModelFile::Dictionary(_) => "dict.txt",
        }
    }

    /// Download URL. PaddleOCR ONNX exports from Hugging Face
    /// (monkt/paddleocr-onnx).
    pub fn download_url(&self) -> String {
        const BASE: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";
        match self {
            ModelFile::Detection => format!("{BASE}/detection/v3/det.onnx"),
            ModelFile::Recognition(pack) => {
                format!("{BASE}/languages/{}/rec.onnx", pack.dir_name())
            }
            ModelFile::Dictionary(pack) => {
                format!("{BASE}/languages/{}/dict.txt", pack.dir_name())
            }
        }
    }

    /// Plausible file size bounds, used as a cheap integrity check.
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelFile::Detection => (1_000_000, 10_000_000),
            ModelFile::Recognition(_) => (2_000_000, 30_000_000),
            ModelFile::Dictionary(_) => (100, 200_000),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelFile::Detection => "Text Detection",
            ModelFile::Recognition(_) => "Text Recognition",
            ModelFile::Dictionary(_) => "Character Dictionary",
        }
    }
}

/// Paths to everything one language pack needs at inference time.
#[derive(Debug, Clone)]
pub struct PackPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
}

/// Manifest tracking downloaded files and their checksums.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelManifest {
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Downloads and caches model files under the per-user data directory.
pub struct ModelManager {
    models_dir: PathBuf,
    http_timeout: std::time::Duration,
}

impl ModelManager {
    pub fn new() -> Result<Self> {
        let models_dir = crate::config::get_data_dir()?.join("models");
        Self::with_dir(models_dir)
    }

    /// Use a custom directory (tests, packaged installs).
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            http_timeout: std::time::Duration::from_secs(300),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// On-disk location for a model file.
    pub fn model_path(&self, file: ModelFile) -> PathBuf {
        match file {
            ModelFile::Detection => self.models_dir.join(file.filename()),
            ModelFile::Recognition(pack) | ModelFile::Dictionary(pack) => {
                self.models_dir.join(pack.dir_name()).join(file.filename())
            }
        }
    }

    /// Whether the file exists with a believable size.
    pub fn is_available(&self, file: ModelFile) -> bool {
        let path = self.model_path(file);
        match std::fs::metadata(&path) {
            Ok(metadata) => {
                let (min, max) = file.expected_size_range();
                metadata.len() >= min && metadata.len() <= max
            }
            Err(_) => false,
        }
    }

    /// Make sure a file is present, downloading it if needed.
    pub fn ensure(&self, file: ModelFile) -> Result<PathBuf> {
        let path = self.model_path(file);

        if self.is_available(file) {
            debug!("{} already available at {:?}", file.display_name(), path);
            return Ok(path);
        }

        self.download(file)?;
        Ok(path)
    }

    /// Make sure everything one language pack needs is present.
    pub fn ensure_pack(&self, pack: LanguagePack) -> Result<PackPaths> {
        Ok(PackPaths {
            detection: self.ensure(ModelFile::Detection)?,
            recognition: self.ensure(ModelFile::Recognition(pack))?,
            dictionary: self.ensure(ModelFile::Dictionary(pack))?,
        })
    }

    /// Stream the file to a temp path, hash it, then move it into place.
    fn download(&self, file: ModelFile) -> Result<()> {
        let url = file.download_url();
        let path = self.model_path(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Downloading {} from {}", file.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(self.download_file_async(&url, &path))?;

        if !self.is_available(file) {
            std::fs::remove_file(&path).ok();
            anyhow::bail!(
                "Downloaded {} has an implausible size, removed it",
                file.display_name()
            );
        }

        self.record_in_manifest(file, &sha256)?;
        info!("Downloaded {} to {:?}", file.display_name(), path);
        Ok(())
    }

    async fn download_file_async(&self, url: &str, path: &Path) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
        }
        file.flush().context("Failed to flush temp file")?;
        drop(file);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file into place")?;

        Ok(format!("{:x}", hasher.finalize()))
    }

    fn manifest_path(&self) -> PathBuf {
        self.models_dir.join("manifest.json")
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let path = self.manifest_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    fn record_in_manifest(&self, file: ModelFile, sha256: &str) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(file);
        let relative_path = path
            .strip_prefix(&self.models_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        let entry = ManifestEntry {
            relative_path: relative_path.clone(),
            size_bytes: std::fs::metadata(&path)?.len(),
            sha256: sha256.to_string(),
        };

        if let Some(existing) = manifest
            .files
            .iter_mut()
            .find(|e| e.relative_path == relative_path)
        {
            *existing = entry;
        } else {
            manifest.files.push(entry);
        }

        let content = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(self.manifest_path(), content)?;
        Ok(())
    }
}
