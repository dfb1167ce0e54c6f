//! Whisper transcription of audio files into a JSON result, as a one-shot
//! CLI (`voxscribe`) or an HTTP/WebSocket service (`voxscribe-server`).

pub mod audio;
pub mod config;
pub mod error;
pub mod server;
pub mod transcriber;

pub use error::TranscribeError;
pub use transcriber::types::{LanguageHint, Transcript, TranscriptionResult};
pub use transcriber::{transcribe_file, transcribe_with_model};
