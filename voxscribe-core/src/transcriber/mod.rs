//! File transcription: path check, model load, inference, result mapping.

pub mod backend;
pub mod models;
pub mod types;
#[cfg(feature = "whisper")]
pub mod whisper;

use std::path::Path;
use tracing::{info, warn};

use crate::error::TranscribeError;
use backend::{SpeechBackend, SpeechModel};
use models::ModelConfig;
use types::{LanguageHint, Transcript, TranscriptionResult};

/// The backend this build ships with.
pub fn default_backend(config: &ModelConfig) -> Box<dyn SpeechBackend> {
    #[cfg(feature = "whisper")]
    {
        Box::new(whisper::WhisperBackend::new(config))
    }
    #[cfg(not(feature = "whisper"))]
    {
        let _ = config;
        Box::new(backend::UnavailableBackend)
    }
}

/// Transcribe one file end to end, loading `model_name` from `backend`.
///
/// Never fails: every error becomes a `success=false` result. A missing file
/// is reported before the backend is touched.
pub fn transcribe_file<B>(
    backend: &B,
    model_name: &str,
    audio_file: &Path,
    language: &LanguageHint,
) -> TranscriptionResult
where
    B: SpeechBackend + ?Sized,
{
    let result = check_exists(audio_file).and_then(|()| {
        let model = backend.load_model(model_name)?;
        run(model.as_ref(), audio_file, language)
    });
    finish(audio_file, result)
}

/// Transcribe with an already loaded model (server mode).
pub fn transcribe_with_model(
    model: &dyn SpeechModel,
    audio_file: &Path,
    language: &LanguageHint,
) -> TranscriptionResult {
    let result = check_exists(audio_file).and_then(|()| run(model, audio_file, language));
    finish(audio_file, result)
}

fn check_exists(audio_file: &Path) -> Result<(), TranscribeError> {
    if audio_file.exists() {
        Ok(())
    } else {
        Err(TranscribeError::FileNotFound(audio_file.to_path_buf()))
    }
}

fn run(
    model: &dyn SpeechModel,
    audio_file: &Path,
    language: &LanguageHint,
) -> Result<Transcript, TranscribeError> {
    info!(path = %audio_file.display(), language = %language, "Transcribing");
    model.transcribe(audio_file, language.as_code())
}

fn finish(audio_file: &Path, result: Result<Transcript, TranscribeError>) -> TranscriptionResult {
    if let Err(e) = &result {
        warn!(path = %audio_file.display(), "{}", e);
    }
    result.into()
}
