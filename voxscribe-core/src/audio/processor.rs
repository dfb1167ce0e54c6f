use anyhow::{anyhow, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::info;

use super::decode::DecodedAudio;

/// Sample rate Whisper expects.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Mono samples ready for inference.
#[derive(Debug, Clone)]
pub struct AudioSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Sample rate of the source file.
    pub source_sample_rate: u32,
    /// Channel count of the source file.
    pub source_channels: usize,
}

impl AudioSamples {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Turns decoded audio into mono 16kHz buffers suitable for Whisper inference.
///
/// Handles downmixing, resampling and peak normalization.
pub struct AudioProcessor {
    /// Target sample rate (16000 for Whisper).
    target_sample_rate: u32,
    /// Peak level quiet audio is raised to.
    target_peak: f32,
}

impl AudioProcessor {
    pub fn new(target_sample_rate: u32, target_peak: f32) -> Self {
        Self {
            target_sample_rate,
            target_peak,
        }
    }

    /// Downmix, resample and normalize a decoded file.
    pub fn process(&self, audio: DecodedAudio) -> Result<AudioSamples> {
        let source_sample_rate = audio.sample_rate;
        let source_channels = audio.channels;

        let mono = downmix(&audio.samples, audio.channels);
        let mut samples = if source_sample_rate != self.target_sample_rate {
            resample(&mono, source_sample_rate, self.target_sample_rate)?
        } else {
            mono
        };
        peak_normalize(&mut samples, self.target_peak);

        let processed = AudioSamples {
            samples,
            sample_rate: self.target_sample_rate,
            source_sample_rate,
            source_channels,
        };

        info!(
            samples = processed.samples.len(),
            duration_secs = processed.duration_secs(),
            source_sample_rate,
            source_channels,
            "Audio buffer ready for transcription"
        );

        Ok(processed)
    }
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new(WHISPER_SAMPLE_RATE, 0.95)
    }
}

/// Average interleaved frames down to one channel.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Sinc resampling of a mono buffer.
///
/// The output is aligned with the input and has `len * to / from` frames.
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if input.is_empty() || from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (input.len() as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)
        .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;
    let delay = resampler.output_delay();

    let waves_in = vec![input.to_vec()];
    let mut output = resampler
        .process(&waves_in, None)
        .map_err(|e| anyhow!("Resampling failed: {}", e))?
        .pop()
        .unwrap_or_default();

    // Flush the filter so the tail of the input is not lost to its delay.
    for _ in 0..4 {
        if output.len() >= delay + expected {
            break;
        }
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| anyhow!("Resampling failed: {}", e))?;
        output.extend(tail.into_iter().next().unwrap_or_default());
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Scale so the loudest sample reaches `target`. Louder or silent audio is untouched.
fn peak_normalize(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 || peak >= target {
        return;
    }
    let gain = target / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn quiet_audio_is_raised_to_target_peak() {
        let mut samples = vec![0.1, -0.2, 0.05];
        peak_normalize(&mut samples, 0.95);
        assert!((samples[1] + 0.95).abs() < 1e-6);
        assert!((samples[0] - 0.475).abs() < 1e-6);
    }

    #[test]
    fn silence_is_left_alone() {
        let mut samples = vec![0.0; 8];
        peak_normalize(&mut samples, 0.95);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn process_resamples_to_16k_mono() {
        let frames = 48_000;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (i as f32 * 0.01).sin() * 0.5;
                [v, v]
            })
            .collect();
        let decoded = DecodedAudio {
            samples,
            sample_rate: 48_000,
            channels: 2,
        };

        let out = AudioProcessor::default().process(decoded).unwrap();
        assert_eq!(out.sample_rate, WHISPER_SAMPLE_RATE);
        assert_eq!(out.source_channels, 2);
        assert_eq!(out.samples.len(), 16_000);
    }

    #[test]
    fn resampling_keeps_timing_and_tail() {
        // Silence for half a second, then a constant level.
        let mut input = vec![0.0f32; 24_000];
        input.extend(std::iter::repeat(0.5).take(24_000));

        let out = resample(&input, 48_000, 16_000).unwrap();

        assert_eq!(out.len(), 16_000);
        // The step stays at 0.5 s instead of being pushed later by the filter delay.
        assert!(out[7_970].abs() < 0.05, "before step: {}", out[7_970]);
        assert!((out[8_030] - 0.5).abs() < 0.05, "after step: {}", out[8_030]);
        // The final samples still carry the signal.
        assert!((out[15_900] - 0.5).abs() < 0.05, "tail: {}", out[15_900]);
    }

    #[test]
    fn matching_rate_skips_resampling() {
        let decoded = DecodedAudio {
            samples: vec![0.5; 1600],
            sample_rate: WHISPER_SAMPLE_RATE,
            channels: 1,
        };
        let out = AudioProcessor::default().process(decoded).unwrap();
        assert_eq!(out.samples.len(), 1600);
        assert!((out.samples[0] - 0.95).abs() < 1e-6);
    }
}
