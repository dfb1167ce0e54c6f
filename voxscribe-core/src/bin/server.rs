use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use voxscribe_core::config::ModelArgs;
use voxscribe_core::server::http::TranscriptServer;
use voxscribe_core::transcriber::default_backend;

#[derive(Parser)]
#[command(name = "voxscribe-server")]
#[command(about = "VoxScribe server — Whisper transcription over HTTP with WebSocket broadcast")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// HTTP/WebSocket port.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    #[command(flatten)]
    model: ModelArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.model.to_config();

    info!(model = %config.name, "Loading model (downloads on first use)...");
    let model = tokio::task::spawn_blocking(move || {
        default_backend(&config).load_model(&config.name)
    })
    .await
    .context("Model loading task failed")?
    .context("Failed to load Whisper model")?;

    let server = TranscriptServer::new(cli.host, cli.port, Arc::from(model));
    server.run().await?;

    info!("VoxScribe server shut down cleanly.");
    Ok(())
}
