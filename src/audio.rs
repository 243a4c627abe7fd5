use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sample rate Whisper expects
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Errors that can occur while decoding audio files
#[derive(Debug, Error)]
pub enum AudioError {
    /// The file is not a readable WAV stream
    #[error("failed to decode audio file {path}")]
    Decode {
        /// Audio file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: hound::Error,
    },

    /// The header declares an unusable layout
    #[error("unsupported audio layout in {path}: {reason}")]
    Unsupported {
        /// Audio file path
        path: PathBuf,
        /// What was wrong
        reason: String,
    },
}

/// Reads a WAV file as 16kHz mono f32 samples in `[-1.0, 1.0]`
///
/// # Errors
/// Returns error if the file is not a valid WAV or declares zero channels/rate
#[allow(clippy::cast_precision_loss)]
pub fn load_wav_16k_mono(path: &Path) -> Result<Vec<f32>, AudioError> {
    let decode_err = |source| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = WavReader::open(path).map_err(decode_err)?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(AudioError::Unsupported {
            path: path.to_path_buf(),
            reason: format!(
                "{} channels at {} Hz",
                spec.channels, spec.sample_rate
            ),
        });
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        SampleFormat::Int => {
            // Full-scale value for the declared bit depth
            let max_val = (1_u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        samples = samples.len(),
        "decoded wav"
    );

    Ok(to_16khz_mono(&samples, spec.sample_rate, spec.channels))
}

/// Downmixes interleaved samples to mono and resamples to 16kHz
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn to_16khz_mono(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<f32> {
    let _span = tracing::debug_span!("to_16khz_mono").entered();

    let mono_samples = if channels <= 1 {
        samples.to_vec()
    } else {
        // Average channels (simple downmix)
        let channels_f64 = f64::from(channels);
        samples
            .chunks(usize::from(channels))
            .map(|frame| {
                let sum_f64: f64 = frame.iter().map(|&s| f64::from(s)).sum();
                (sum_f64 / channels_f64) as f32
            })
            .collect()
    };

    if sample_rate == WHISPER_SAMPLE_RATE || mono_samples.is_empty() {
        return mono_samples;
    }

    // Linear interpolation over fractional source indices
    let start = std::time::Instant::now();
    let ratio = f64::from(sample_rate) / f64::from(WHISPER_SAMPLE_RATE);
    let output_len = ((mono_samples.len() as f64) / ratio).ceil() as usize;
    let last = mono_samples.len() - 1;

    let mut resampled = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_idx_f64 = (i as f64) * ratio;
        let src_idx_floor = (src_idx_f64.floor() as usize).min(last);
        let src_idx_ceil = (src_idx_floor + 1).min(last);
        let fract = src_idx_f64 - src_idx_f64.floor();

        let s1 = f64::from(mono_samples[src_idx_floor]);
        let s2 = f64::from(mono_samples[src_idx_ceil]);
        resampled.push(s1.mul_add(1.0 - fract, s2 * fract) as f32);
    }

    debug!(
        source_rate = sample_rate,
        target_rate = WHISPER_SAMPLE_RATE,
        input_samples = mono_samples.len(),
        output_samples = resampled.len(),
        resample_us = start.elapsed().as_micros(),
        "resampling completed"
    );

    resampled
}
