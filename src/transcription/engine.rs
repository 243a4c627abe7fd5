use anyhow::Context;
use std::path::Path;
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{self, AudioError};

/// What the model reports for one audio file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Detected (or caller-declared) language code, e.g. `en`
    pub language: String,
    /// Transcribed text with surrounding whitespace trimmed
    pub text: String,
}

/// Speech-to-text capability
///
/// Production code uses [`TranscriptionEngine`]; handler tests substitute a
/// fake that records its calls.
pub trait SpeechModel {
    /// Transcribe the audio file at `audio_path`
    ///
    /// `language` is a hint such as `en`; `None` lets the model detect it.
    ///
    /// # Errors
    /// Returns error if the file cannot be decoded or inference fails
    fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscriptionError>;
}

/// Errors that can occur during transcription
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Failed to load Whisper model
    #[error("failed to load whisper model from {path}: {source}")]
    ModelLoad {
        /// Path to model file
        path: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Audio could not be decoded
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Failed to create Whisper inference state
    #[error("failed to create whisper state")]
    StateCreation,

    /// No hint was given and the model reported no usable language
    #[error("failed to determine spoken language")]
    LanguageDetection,

    /// Transcription inference failed
    #[error("failed to transcribe audio")]
    Transcription(#[from] anyhow::Error),
}

/// Whisper transcription engine
pub struct TranscriptionEngine {
    ctx: WhisperContext,
    /// Number of CPU threads for inference
    threads: i32,
    /// Beam search width
    beam_size: i32,
}

impl TranscriptionEngine {
    /// Determines sampling strategy based on beam size
    const fn get_sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Creates a new `TranscriptionEngine` by loading the model from the given path
    ///
    /// # Errors
    /// Returns error if model file doesn't exist, is invalid, or if `threads`/`beam_size`
    /// are zero or exceed `i32::MAX`
    pub fn new(
        model_path: &Path,
        threads: usize,
        beam_size: usize,
    ) -> Result<Self, TranscriptionError> {
        let load_err = |source: anyhow::Error| TranscriptionError::ModelLoad {
            path: model_path.display().to_string(),
            source,
        };

        if threads == 0 {
            return Err(load_err(anyhow::anyhow!("threads must be > 0")));
        }
        if beam_size == 0 {
            return Err(load_err(anyhow::anyhow!("beam_size must be > 0")));
        }

        // whisper-rs takes i32 for both
        let threads_i32 = i32::try_from(threads)
            .map_err(|_| load_err(anyhow::anyhow!("threads value too large (max: {})", i32::MAX)))?;
        let beam_size_i32 = i32::try_from(beam_size).map_err(|_| {
            load_err(anyhow::anyhow!("beam_size value too large (max: {})", i32::MAX))
        })?;

        tracing::info!(
            path = %model_path.display(),
            threads,
            beam_size,
            "loading whisper model"
        );

        let path_str = model_path
            .to_str()
            .ok_or_else(|| load_err(anyhow::anyhow!("model path contains invalid UTF-8")))?;

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| load_err(anyhow::anyhow!("{e:?}")))?;

        tracing::info!("whisper model loaded successfully");

        Ok(Self {
            ctx,
            threads: threads_i32,
            beam_size: beam_size_i32,
        })
    }

    /// Runs inference on 16kHz mono samples
    ///
    /// # Errors
    /// Returns error if Whisper inference fails or no language can be determined
    pub fn transcribe_samples(
        &self,
        audio_data: &[f32],
        language: Option<&str>,
    ) -> Result<Transcript, TranscriptionError> {
        let _span = tracing::debug_span!("transcription", samples = audio_data.len()).entered();
        tracing::debug!(language = ?language, "starting transcription");

        let mut state = self
            .ctx
            .create_state()
            .map_err(|_| TranscriptionError::StateCreation)?;

        let strategy = Self::get_sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(language.unwrap_or("auto")));
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, audio_data)
            .context("whisper inference failed")?;
        let inference_duration = start.elapsed();

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }
        let text = text.trim().to_owned();

        let detected = resolve_language(state.full_lang_id_from_state(), language)?;

        tracing::info!(
            segments = state.full_n_segments(),
            language = %detected,
            text_len = text.len(),
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        Ok(Transcript {
            language: detected,
            text,
        })
    }
}

/// Language code for a whisper language id, falling back to the caller's hint
fn resolve_language(lang_id: i32, hint: Option<&str>) -> Result<String, TranscriptionError> {
    whisper_rs::get_lang_str(lang_id)
        .or(hint)
        .map(str::to_owned)
        .ok_or(TranscriptionError::LanguageDetection)
}

impl SpeechModel for TranscriptionEngine {
    fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscriptionError> {
        let samples = audio::load_wav_16k_mono(audio_path)?;
        self.transcribe_samples(&samples, language)
    }
}

#[cfg(test)]
#[allow(clippy::print_stderr)] // Test diagnostics
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn get_test_model_path() -> Option<PathBuf> {
        let path = PathBuf::from(std::env::var("S3_WHISPER_TEST_MODEL").ok()?);
        path.exists().then_some(path)
    }

    #[test]
    fn test_model_load_nonexistent_path() {
        let nonexistent_path = Path::new("/tmp/nonexistent_model.bin");
        let result = TranscriptionEngine::new(nonexistent_path, 4, 5);

        assert!(matches!(result, Err(TranscriptionError::ModelLoad { .. })));
        if let Err(TranscriptionError::ModelLoad { path, .. }) = result {
            assert!(path.contains("nonexistent_model.bin"));
        }
    }

    #[test]
    fn test_new_with_zero_threads() {
        let result = TranscriptionEngine::new(Path::new("/tmp/dummy.bin"), 0, 5);
        let err = result.err().unwrap();
        assert!(matches!(
            &err,
            TranscriptionError::ModelLoad { source, .. } if source.to_string().contains("threads must be > 0")
        ));
    }

    #[test]
    fn test_new_with_zero_beam_size() {
        let result = TranscriptionEngine::new(Path::new("/tmp/dummy.bin"), 4, 0);
        let err = result.err().unwrap();
        assert!(matches!(
            &err,
            TranscriptionError::ModelLoad { source, .. } if source.to_string().contains("beam_size must be > 0")
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_thread_count_overflow() {
        let path = Path::new("/tmp/dummy.bin");
        let result = TranscriptionEngine::new(path, (i32::MAX as usize) + 1, 5);
        let err = result.err().unwrap();
        assert!(matches!(
            &err,
            TranscriptionError::ModelLoad { source, .. } if source.to_string().contains("threads value too large")
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_beam_size_overflow() {
        let path = Path::new("/tmp/dummy.bin");
        let result = TranscriptionEngine::new(path, 4, (i32::MAX as usize) + 1);
        let err = result.err().unwrap();
        assert!(matches!(
            &err,
            TranscriptionError::ModelLoad { source, .. } if source.to_string().contains("beam_size value too large")
        ));
    }

    #[test]
    fn test_get_sampling_strategy_greedy() {
        let strategy = TranscriptionEngine::get_sampling_strategy(1);
        assert!(matches!(strategy, SamplingStrategy::Greedy { best_of: 1 }));
    }

    #[test]
    fn test_get_sampling_strategy_beam_search() {
        for beam in [2, 5, 10] {
            let strategy = TranscriptionEngine::get_sampling_strategy(beam);
            assert!(
                matches!(strategy, SamplingStrategy::BeamSearch { beam_size, patience } if beam_size == beam && patience < 0.0),
                "Expected BeamSearch with beam_size={beam}"
            );
        }
    }

    #[test]
    fn test_resolve_language_from_id() {
        assert_eq!(resolve_language(0, None).unwrap(), "en");
        assert_eq!(resolve_language(0, Some("he")).unwrap(), "en");
    }

    #[test]
    fn test_resolve_language_falls_back_to_hint() {
        assert_eq!(resolve_language(-1, Some("he")).unwrap(), "he");
    }

    #[test]
    fn test_resolve_language_without_id_or_hint() {
        let result = resolve_language(-1, None);
        assert!(matches!(result, Err(TranscriptionError::LanguageDetection)));
    }

    #[test]
    #[ignore = "requires actual model file (set S3_WHISPER_TEST_MODEL)"]
    fn test_transcribe_silence_with_hint() {
        let Some(model_path) = get_test_model_path() else {
            eprintln!("Skipping test: S3_WHISPER_TEST_MODEL not set");
            return;
        };

        let engine = TranscriptionEngine::new(&model_path, 4, 1).unwrap();
        let silence: Vec<f32> = vec![0.0; 16000];

        let transcript = engine.transcribe_samples(&silence, Some("en")).unwrap();
        assert_eq!(transcript.language, "en");
        assert!(transcript.text.len() < 50);
    }

    #[test]
    #[ignore = "requires actual model file (set S3_WHISPER_TEST_MODEL)"]
    fn test_transcribe_wav_auto_detect() {
        use hound::{SampleFormat, WavSpec, WavWriter};

        let Some(model_path) = get_test_model_path() else {
            eprintln!("Skipping test: S3_WHISPER_TEST_MODEL not set");
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("silence.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&wav_path, spec).unwrap();
        for _ in 0..32000 {
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let engine = TranscriptionEngine::new(&model_path, 4, 1).unwrap();
        let transcript = engine.transcribe(&wav_path, None).unwrap();
        assert!(!transcript.language.is_empty());
    }
}
