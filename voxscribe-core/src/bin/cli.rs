use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, info};

use voxscribe_core::config::ModelArgs;
use voxscribe_core::transcriber::default_backend;
use voxscribe_core::transcriber::types::{LanguageHint, DEFAULT_LANGUAGE};
use voxscribe_core::transcribe_file;

const USAGE: &str = "Usage: voxscribe <audio_file> [language]";

#[derive(Parser)]
#[command(name = "voxscribe")]
#[command(about = "VoxScribe — transcribe an audio file with Whisper and print JSON")]
struct Cli {
    /// Audio file to transcribe.
    #[arg(allow_hyphen_values = true)]
    audio_file: Option<PathBuf>,

    /// Language code (e.g. "ja", "en"), or "auto" to detect it.
    #[arg(default_value = DEFAULT_LANGUAGE, allow_hyphen_values = true)]
    language: LanguageHint,

    /// Anything after the language is ignored.
    #[arg(hide = true)]
    ignored: Vec<String>,

    #[command(flatten)]
    model: ModelArgs,

    /// Also write the JSON result to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    // stdout carries the JSON document only.
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let Some(audio_file) = cli.audio_file else {
        println!("{USAGE}");
        std::process::exit(1);
    };

    if !cli.ignored.is_empty() {
        debug!(ignored = ?cli.ignored, "Ignoring extra arguments");
    }

    let config = cli.model.to_config();
    let backend = default_backend(&config);
    let result = transcribe_file(backend.as_ref(), &config.name, &audio_file, &cli.language);
    let json = result.to_json_pretty();

    if let Some(output) = &cli.output {
        match std::fs::write(output, format!("{json}\n")) {
            Ok(()) => info!(path = %output.display(), "Result saved"),
            Err(e) => error!(path = %output.display(), "Failed to save result: {}", e),
        }
    }

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}")?;
    Ok(())
}
