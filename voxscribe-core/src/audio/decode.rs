use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use super::processor::WHISPER_SAMPLE_RATE;

/// Decoded PCM straight from the container, before any processing.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// Decode an audio file.
///
/// symphonia handles the common formats natively. Anything it rejects, such as
/// Opus in WebM from browser recorders, is converted by ffmpeg when installed.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let native_err = match decode_with_symphonia(path) {
        Ok(audio) => return Ok(audio),
        Err(e) => e,
    };

    let Some(ffmpeg) = find_ffmpeg_path() else {
        return Err(native_err);
    };

    info!(path = %path.display(), "Native decoder failed ({:#}); trying ffmpeg", native_err);
    decode_with_ffmpeg(&ffmpeg, path)
        .map_err(|e| anyhow!("{:#} (ffmpeg fallback failed: {:#})", native_err, e))
}

/// ffmpeg binary on PATH, if any.
pub fn find_ffmpeg_path() -> Option<PathBuf> {
    which::which("ffmpeg").ok()
}

/// Convert through ffmpeg straight to 16kHz mono f32.
fn decode_with_ffmpeg(ffmpeg: &Path, path: &Path) -> Result<DecodedAudio> {
    let rate = WHISPER_SAMPLE_RATE.to_string();
    let output = Command::new(ffmpeg)
        .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(path)
        .args(["-vn", "-f", "f32le", "-ac", "1", "-ar", &rate, "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to run ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffmpeg exited with {}: {}", output.status, stderr.trim());
    }

    let samples = f32le_samples(&output.stdout);
    if samples.is_empty() {
        bail!("Audio file contains no decodable samples");
    }

    debug!(path = %path.display(), samples = samples.len(), "Audio decoded by ffmpeg");
    Ok(DecodedAudio {
        samples,
        sample_rate: WHISPER_SAMPLE_RATE,
        channels: 1,
    })
}

fn f32le_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode the first audio track of any format symphonia recognizes.
///
/// The file extension is used as a format hint; the content decides.
fn decode_with_symphonia(path: &Path) -> Result<DecodedAudio> {
    let file =
        File::open(path).with_context(|| format!("Failed to open audio file {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("Unrecognized audio format: {}", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Unsupported audio codec: {}", e))?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("Failed to read audio packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Corrupt packets are skipped; the rest of the stream may be fine.
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(anyhow!("Failed to decode audio: {}", e)),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        bail!("Audio file contains no decodable samples");
    }

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "Audio decoded"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
