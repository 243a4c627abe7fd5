//! S3 Whisper handler - transcribe audio objects from S3-compatible storage
//!
//! The library exposes the two hosting-runtime hooks ([`handler::model_fn`] and
//! [`handler::predict_fn`]) plus the pieces they are built from.

/// Audio decoding and resampling
pub mod audio;
/// Configuration management
pub mod config;
/// Model loading and request handling
pub mod handler;
/// Storage locator parsing
pub mod locator;
/// Object storage client
pub mod storage;
/// Logging setup
pub mod telemetry;
/// Whisper transcription engine
pub mod transcription;

pub use handler::{model_fn, predict_fn, Handler, HandlerError, Request, Response};
