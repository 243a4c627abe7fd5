//! Hosting-runtime entry points
//!
//! A hosting platform calls [`model_fn`] once per worker process and then
//! [`predict_fn`] once per request, passing back the loaded model. Requests are
//! JSON objects with a required `s3_file` locator and an optional `language`
//! hint; responses carry `detected_language` and `transcription`.
//!
//! Each request downloads its audio into a fresh temporary file in the scratch
//! directory. The file is removed when the request finishes, whether it
//! succeeded or not.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ModelConfig, StorageConfig};
use crate::locator::StorageLocator;
use crate::storage::{ObjectStorage, S3Storage, StorageError};
use crate::transcription::{
    self, SpeechModel, Transcript, TranscriptionEngine, TranscriptionError,
};

/// Request field holding the storage locator
pub const S3_FILE_FIELD: &str = "s3_file";
/// Request field holding the optional language hint
pub const LANGUAGE_FIELD: &str = "language";

/// Incoming request body; fields are removed as they are consumed
pub type Request = Map<String, Value>;

/// Result of one prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Language reported by the model
    pub detected_language: String,
    /// Transcript text
    pub transcription: String,
}

impl From<Transcript> for Response {
    fn from(transcript: Transcript) -> Self {
        Self {
            detected_language: transcript.language,
            transcription: transcript.text,
        }
    }
}

/// Errors surfaced to the hosting runtime
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request body is not valid JSON
    #[error("request is not valid JSON")]
    MalformedJson(#[from] serde_json::Error),

    /// Request body is JSON but not an object
    #[error("request must be a JSON object")]
    NotAnObject,

    /// A required field is absent or null
    #[error("request is missing required field `{0}`")]
    MissingField(&'static str),

    /// A field has the wrong JSON type
    #[error("request field `{0}` must be a string")]
    InvalidField(&'static str),

    /// The locator has no bucket and no fallback object is configured
    #[error("locator {0:?} names no bucket")]
    EmptyBucket(String),

    /// The per-request download file could not be created
    #[error("failed to create scratch file in {dir}")]
    Scratch {
        /// Scratch directory
        dir: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Model weights could not be located or fetched
    #[error("failed to prepare model weights")]
    ModelWeights(#[source] anyhow::Error),

    /// Storage client failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Model failure
    #[error(transparent)]
    Model(#[from] TranscriptionError),
}

impl HandlerError {
    /// Whether the caller sent a bad request, as opposed to a server-side failure
    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::MalformedJson(_)
                | Self::NotAnObject
                | Self::MissingField(_)
                | Self::InvalidField(_)
                | Self::EmptyBucket(_)
        )
    }
}

/// Loads the transcription model
///
/// The weights for `config.name` are expected in `model_dir` unless
/// `config.path` points elsewhere; missing weights are downloaded when
/// `config.download` is set.
///
/// # Errors
/// Returns error if the weights cannot be fetched or the model fails to load
pub fn model_fn(
    model_dir: &Path,
    config: &ModelConfig,
) -> Result<TranscriptionEngine, HandlerError> {
    let weights =
        transcription::weights_path(model_dir, config).map_err(HandlerError::ModelWeights)?;

    if config.download {
        transcription::ensure_model_downloaded(&config.name, &weights)
            .map_err(HandlerError::ModelWeights)?;
    }

    Ok(TranscriptionEngine::new(&weights, config.threads, config.beam_size)?)
}

/// Parses a locator, substituting the configured fallback when it has no bucket
///
/// # Errors
/// Returns [`HandlerError::EmptyBucket`] if there is no bucket and no fallback
pub fn resolve_locator(
    raw: &str,
    storage: &StorageConfig,
) -> Result<StorageLocator, HandlerError> {
    let locator = StorageLocator::parse(raw);
    if !locator.is_bucketless() {
        return Ok(locator);
    }

    let fallback = storage
        .fallback()
        .ok_or_else(|| HandlerError::EmptyBucket(raw.to_owned()))?;
    warn!(
        locator = raw,
        fallback = %fallback,
        "locator has no bucket, using fallback object"
    );
    Ok(fallback)
}

/// Downloads the object named by `locator` and transcribes it
///
/// # Errors
/// Returns error if the locator cannot be resolved, the download fails, or
/// the model fails
pub fn transcribe_from_storage<M, S>(
    model: &M,
    storage: &S,
    locator: &str,
    language: Option<&str>,
    config: &StorageConfig,
) -> Result<Transcript, HandlerError>
where
    M: SpeechModel + ?Sized,
    S: ObjectStorage + ?Sized,
{
    let locator = resolve_locator(locator, config)?;

    let scratch_dir = PathBuf::from(&config.scratch_dir);
    let scratch = tempfile::Builder::new()
        .prefix("s3-whisper-")
        .suffix(&scratch_suffix(&locator.key))
        .tempfile_in(&scratch_dir)
        .map_err(|source| HandlerError::Scratch {
            dir: scratch_dir.clone(),
            source,
        })?;

    storage.download(&locator.bucket, &locator.key, scratch.path())?;
    let transcript = model.transcribe(scratch.path(), language)?;

    Ok(transcript)
}

/// Handles one request against a loaded model
///
/// `s3_file` and `language` are removed from `request`; other fields are left
/// untouched. Both are validated before any download starts.
///
/// # Errors
/// Returns error if the request is malformed or transcription fails
pub fn predict_fn<M, S>(
    request: &mut Request,
    model: &M,
    storage: &S,
    config: &StorageConfig,
) -> Result<Response, HandlerError>
where
    M: SpeechModel + ?Sized,
    S: ObjectStorage + ?Sized,
{
    let s3_file = take_string(request, S3_FILE_FIELD)?
        .ok_or(HandlerError::MissingField(S3_FILE_FIELD))?;
    let language = take_string(request, LANGUAGE_FIELD)?;

    info!(s3_file = %s3_file, language = ?language, "prediction requested");

    let transcript =
        transcribe_from_storage(model, storage, &s3_file, language.as_deref(), config)?;

    Ok(transcript.into())
}

fn take_string(
    request: &mut Request,
    field: &'static str,
) -> Result<Option<String>, HandlerError> {
    match request.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(HandlerError::InvalidField(field)),
    }
}

/// Keeps the object's extension on the scratch file, e.g. `.wav`
fn scratch_suffix(key: &str) -> String {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// A loaded model together with its storage client
pub struct Handler<M = TranscriptionEngine, S = S3Storage> {
    model: M,
    storage: S,
    config: StorageConfig,
}

impl Handler {
    /// Loads the model and creates the S3 client described by `config`
    ///
    /// # Errors
    /// Returns error if the model cannot be loaded or the client cannot start
    pub fn from_config(model_dir: &Path, config: &Config) -> Result<Self, HandlerError> {
        let model = model_fn(model_dir, &config.model)?;
        let storage = S3Storage::new(&config.storage)?;
        Ok(Self::new(model, storage, config.storage.clone()))
    }
}

impl<M: SpeechModel, S: ObjectStorage> Handler<M, S> {
    /// Wraps an already loaded model and storage client
    pub const fn new(model: M, storage: S, config: StorageConfig) -> Self {
        Self {
            model,
            storage,
            config,
        }
    }

    /// Handles one request, see [`predict_fn`]
    ///
    /// # Errors
    /// Returns error if the request is malformed or transcription fails
    pub fn predict(&self, request: &mut Request) -> Result<Response, HandlerError> {
        predict_fn(request, &self.model, &self.storage, &self.config)
    }

    /// Handles one JSON-encoded request and returns the JSON reply
    ///
    /// Failures become `{"error": "..."}` so a serving loop can keep going.
    pub fn handle_json(&self, body: &str) -> Value {
        match self.handle_json_inner(body) {
            Ok(response) => serde_json::to_value(response)
                .unwrap_or_else(|e| error_body(&HandlerError::MalformedJson(e))),
            Err(e) => {
                if e.is_bad_request() {
                    warn!(error = %e, "rejected request");
                } else {
                    tracing::error!(error = ?e, "prediction failed");
                }
                error_body(&e)
            }
        }
    }

    fn handle_json_inner(&self, body: &str) -> Result<Response, HandlerError> {
        let Value::Object(mut request) = serde_json::from_str::<Value>(body)? else {
            return Err(HandlerError::NotAnObject);
        };
        self.predict(&mut request)
    }
}

/// Flattens the error chain into `{"error": "outer: inner: ..."}`
fn error_body(error: &HandlerError) -> Value {
    use std::error::Error as _;

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    serde_json::json!({ "error": message })
}
