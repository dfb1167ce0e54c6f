use std::path::Path;

use super::types::Transcript;
use crate::error::TranscribeError;

/// Source of speech models ("load a named model").
pub trait SpeechBackend {
    /// Load the pretrained model called `name` (e.g. "base").
    fn load_model(&self, name: &str) -> Result<Box<dyn SpeechModel>, TranscribeError>;
}

/// A loaded model ("transcribe a file, optionally with a language hint").
///
/// Models are shared across server requests, so they must be thread-safe.
pub trait SpeechModel: Send + Sync {
    /// Transcribe the audio at `audio_path`. `None` means detect the language.
    fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscribeError>;
}

/// Backend used when this build carries no speech-recognition capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl SpeechBackend for UnavailableBackend {
    fn load_model(&self, _name: &str) -> Result<Box<dyn SpeechModel>, TranscribeError> {
        Err(TranscribeError::BackendUnavailable)
    }
}
