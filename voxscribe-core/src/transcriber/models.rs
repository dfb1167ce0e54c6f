use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::TranscribeError;

/// Model used when none is named.
pub const DEFAULT_MODEL: &str = "base";

/// Where ggml Whisper weights are published.
const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Model names whisper.cpp publishes weights for.
pub const KNOWN_MODELS: &[&str] = &[
    "tiny",
    "tiny.en",
    "base",
    "base.en",
    "small",
    "small.en",
    "medium",
    "medium.en",
    "large-v1",
    "large-v2",
    "large-v3",
    "large-v3-turbo",
];

/// Model selection and storage settings shared by both binaries.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model name, one of [`KNOWN_MODELS`].
    pub name: String,
    /// Directory holding `ggml-<name>.bin` files.
    pub dir: PathBuf,
    /// Fetch missing models over the network.
    pub allow_download: bool,
    /// Inference threads; `None` lets whisper.cpp decide.
    pub threads: Option<usize>,
}

impl ModelConfig {
    /// Default model directory: `<data dir>/voxscribe/models`, or `./models`.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("voxscribe").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL.to_string(),
            dir: Self::default_dir(),
            allow_download: true,
            threads: None,
        }
    }
}

/// Resolves model names to weight files, downloading them on first use.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    allow_download: bool,
}

impl ModelStore {
    pub fn new(dir: PathBuf, allow_download: bool) -> Self {
        Self {
            dir,
            allow_download,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.dir.clone(), config.allow_download)
    }

    /// Path the weights for `name` live at (whether or not they exist yet).
    pub fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("ggml-{name}.bin"))
    }

    /// Return the weight file for `name`, downloading it if needed and allowed.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TranscribeError> {
        if !KNOWN_MODELS.contains(&name) {
            return Err(TranscribeError::Processing(format!(
                "unknown model '{}' (available: {})",
                name,
                KNOWN_MODELS.join(", ")
            )));
        }

        let path = self.model_path(name);
        if path.is_file() {
            return Ok(path);
        }

        if !self.allow_download {
            return Err(TranscribeError::ModelNotInstalled {
                name: name.to_string(),
                path,
            });
        }

        download_model(name, &path)?;
        Ok(path)
    }
}

/// Download `ggml-<name>.bin` to `dest` through a `.part` file.
fn download_model(name: &str, dest: &Path) -> Result<()> {
    let url = format!("{MODEL_BASE_URL}/ggml-{name}.bin");
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create model directory {}", parent.display()))?;
    }

    info!(model = name, url, "Downloading Whisper model (first use)");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60 * 30))
        .build()
        .context("Failed to build HTTP client")?;
    let mut response = client
        .get(&url)
        .send()
        .with_context(|| format!("Failed to download model from {url}"))?;
    if !response.status().is_success() {
        bail!("Model download from {} returned {}", url, response.status());
    }

    let part = dest.with_extension("bin.part");
    let mut file =
        File::create(&part).with_context(|| format!("Failed to create {}", part.display()))?;
    let bytes = io::copy(&mut response, &mut file).context("Model download interrupted")?;
    drop(file);
    fs::rename(&part, dest).with_context(|| format!("Failed to move model to {}", dest.display()))?;

    info!(
        model = name,
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model downloaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_file_is_resolved_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().to_path_buf(), false);
        fs::write(store.model_path("tiny"), b"weights").unwrap();

        let path = store.resolve("tiny").unwrap();
        assert_eq!(path, dir.path().join("ggml-tiny.bin"));
    }

    #[test]
    fn offline_missing_model_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().to_path_buf(), false);

        match store.resolve("base") {
            Err(TranscribeError::ModelNotInstalled { name, path }) => {
                assert_eq!(name, "base");
                assert_eq!(path, dir.path().join("ggml-base.bin"));
            }
            other => panic!("expected ModelNotInstalled, got {other:?}"),
        }
    }

    #[test]
    fn unknown_model_is_a_processing_failure() {
        let store = ModelStore::new(PathBuf::from("/nonexistent"), true);
        let err = store.resolve("gigantic").unwrap_err();
        assert!(matches!(err, TranscribeError::Processing(_)));
        assert!(err.to_string().contains("large-v3"));
    }

    #[test]
    fn default_config_uses_base_and_downloads() {
        let config = ModelConfig::default();
        assert_eq!(config.name, "base");
        assert!(config.allow_download);
        assert!(config.dir.ends_with("models"));
    }
}
