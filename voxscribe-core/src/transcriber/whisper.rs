use anyhow::anyhow;
use std::path::Path;
use std::time::Instant;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::backend::{SpeechBackend, SpeechModel};
use super::models::{ModelConfig, ModelStore};
use super::types::Transcript;
use crate::audio::decode::decode_file;
use crate::audio::processor::AudioProcessor;
use crate::error::TranscribeError;

/// Speech backend running whisper.cpp models through `whisper-rs`.
pub struct WhisperBackend {
    store: ModelStore,
    threads: Option<usize>,
}

impl WhisperBackend {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            store: ModelStore::from_config(config),
            threads: config.threads,
        }
    }
}

impl SpeechBackend for WhisperBackend {
    fn load_model(&self, name: &str) -> Result<Box<dyn SpeechModel>, TranscribeError> {
        let path = self.store.resolve(name)?;
        let start = Instant::now();

        info!(model = name, path = %path.display(), "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(
            &path.to_string_lossy(),
            WhisperContextParameters::default(),
        )
        .map_err(|e| anyhow!("Failed to load model {}: {}", name, e))?;

        info!(
            model = name,
            load_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );

        Ok(Box::new(WhisperModel {
            ctx,
            threads: self.threads,
            processor: AudioProcessor::default(),
        }))
    }
}

/// A loaded whisper.cpp model. Each call creates its own decoding state.
pub struct WhisperModel {
    ctx: WhisperContext,
    threads: Option<usize>,
    processor: AudioProcessor,
}

impl SpeechModel for WhisperModel {
    fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscribeError> {
        if let Some(lang) = language {
            if whisper_rs::get_lang_id(lang).is_none() {
                return Err(TranscribeError::Processing(format!(
                    "unsupported language: {lang}"
                )));
            }
        }

        let decoded = decode_file(audio_path)?;
        let audio = self.processor.process(decoded)?;
        let start = Instant::now();

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        // None makes whisper.cpp detect the language.
        params.set_language(language);
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| anyhow!("Failed to create Whisper state: {}", e))?;
        state
            .full(params, &audio.samples)
            .map_err(|e| anyhow!("Inference failed: {}", e))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| anyhow!("Failed to read segments: {}", e))?;
        let mut texts = Vec::new();
        for i in 0..num_segments {
            let segment = state
                .full_get_segment_text_lossy(i)
                .map_err(|e| anyhow!("Failed to read segment {}: {}", i, e))?;
            let segment = segment.trim();
            if !segment.is_empty() {
                texts.push(segment.to_string());
            }
        }

        let detected = state
            .full_lang_id_from_state()
            .ok()
            .and_then(whisper_rs::get_lang_str)
            .map(str::to_string);
        let language = detected
            .or_else(|| language.map(str::to_string))
            .unwrap_or_default();

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            segments = num_segments,
            language = %language,
            rtf = elapsed / audio.duration_secs().max(f32::EPSILON) as f64,
            "Transcription finished"
        );

        Ok(Transcript {
            text: texts.join(" "),
            language,
        })
    }
}
