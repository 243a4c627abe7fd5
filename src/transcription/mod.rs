/// Model weight download and lookup
pub mod download;
/// Whisper model inference engine
pub mod engine;

pub use download::{ensure_model_downloaded, weights_path};
pub use engine::{SpeechModel, Transcript, TranscriptionEngine, TranscriptionError};
