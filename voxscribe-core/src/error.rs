use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between receiving a path and producing a transcript.
///
/// The `Display` text of each variant is what ends up in the `error` field of
/// the JSON result, so it is written for the person reading that output.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// The input path does not exist. Detected before any model work.
    #[error("Audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The speech-recognition capability is not part of this build.
    #[error("Whisper backend not available in this build. Reinstall with: cargo install voxscribe-core --features whisper")]
    BackendUnavailable,

    /// The named model is not on disk and may not be downloaded.
    #[error("Whisper model '{name}' not installed. Download ggml-{name}.bin to {} or run without --offline", .path.display())]
    ModelNotInstalled { name: String, path: PathBuf },

    /// Any other failure while loading the model or transcribing.
    #[error("Whisper processing failed: {0}")]
    Processing(String),
}

impl TranscribeError {
    /// Wrap an error chain as a processing failure, keeping every cause.
    pub fn processing(err: anyhow::Error) -> Self {
        Self::Processing(format!("{err:#}"))
    }
}

impl From<anyhow::Error> for TranscribeError {
    fn from(err: anyhow::Error) -> Self {
        Self::processing(err)
    }
}
