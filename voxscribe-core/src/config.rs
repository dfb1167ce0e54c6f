use clap::Args;
use std::path::PathBuf;

use crate::transcriber::models::{ModelConfig, DEFAULT_MODEL};

/// Model options shared by the CLI and the server.
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Whisper model name (tiny, base, small, medium, large-v3, ...).
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Directory holding ggml-<model>.bin files.
    #[arg(long, env = "VOXSCRIBE_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Never download missing models.
    #[arg(long)]
    pub offline: bool,

    /// Number of inference threads (at least 1).
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: Option<u16>,
}

impl ModelArgs {
    pub fn to_config(&self) -> ModelConfig {
        ModelConfig {
            name: self.model.clone(),
            dir: self
                .model_dir
                .clone()
                .unwrap_or_else(ModelConfig::default_dir),
            allow_download: !self.offline,
            threads: self.threads.map(usize::from),
        }
    }
}
