use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::locator::StorageLocator;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "S3_WHISPER_CONFIG";

/// Environment variable naming the model directory
pub const MODEL_DIR_ENV: &str = "S3_WHISPER_MODEL_DIR";

const DEFAULT_CONFIG_FILE: &str = "~/.s3-whisper-handler.toml";
const DEFAULT_MODEL_DIR: &str = "~/.s3-whisper-handler/models";

/// Top-level handler configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Whisper model settings
    pub model: ModelConfig,
    /// Object storage settings
    pub storage: StorageConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

/// Which ggml model to load and how to run it
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model variant, e.g. `large-v2` or `tiny`
    pub name: String,
    /// Explicit weights file; when unset the weights live in the model directory
    pub path: Option<String>,
    /// Fetch missing weights from the whisper.cpp mirror
    pub download: bool,
    /// CPU threads for inference
    pub threads: usize,
    /// Beam width (1 = greedy)
    pub beam_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "large-v2".to_owned(),
            path: None,
            download: true,
            threads: 4,
            beam_size: 5,
        }
    }
}

/// Object storage access and the smoke-test fallback object
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// AWS region override (otherwise taken from the environment)
    pub region: Option<String>,
    /// Custom S3-compatible endpoint, e.g. a local `MinIO`
    pub endpoint: Option<String>,
    /// Directory for per-request audio downloads
    pub scratch_dir: String,
    /// Substitute the fallback object when a locator has no bucket
    pub fallback_enabled: bool,
    /// Bucket of the fallback object
    pub fallback_bucket: String,
    /// Key of the fallback object
    pub fallback_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            scratch_dir: std::env::temp_dir().display().to_string(),
            fallback_enabled: true,
            fallback_bucket: "sagemaker-us-east-1-905847418383".to_owned(),
            fallback_key: "whisper/data/test/he/test-he-000.wav".to_owned(),
        }
    }
}

impl StorageConfig {
    /// The locator substituted for bucket-less requests, if enabled
    #[must_use]
    pub fn fallback(&self) -> Option<StorageLocator> {
        if !self.fallback_enabled || self.fallback_bucket.is_empty() {
            return None;
        }
        Some(StorageLocator {
            bucket: self.fallback_bucket.clone(),
            key: self.fallback_key.clone(),
        })
    }
}

/// Log output settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.s3-whisper-handler/handler.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from `$S3_WHISPER_CONFIG` or `~/.s3-whisper-handler.toml`
    ///
    /// A missing file yields the built-in defaults.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load() -> Result<Self> {
        let raw = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_owned());
        let config_path = Self::expand_path(&raw)?;

        if !config_path.exists() {
            tracing::info!(
                path = %config_path.display(),
                "config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Model directory from `$S3_WHISPER_MODEL_DIR` or `~/.s3-whisper-handler/models`
    ///
    /// # Errors
    /// Returns error if the default is used and `HOME` is unset
    pub fn model_dir() -> Result<PathBuf> {
        let raw = std::env::var(MODEL_DIR_ENV).unwrap_or_else(|_| DEFAULT_MODEL_DIR.to_owned());
        Self::expand_path(&raw)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::parse(&contents)
    }

    /// Parse config from TOML text
    ///
    /// # Errors
    /// Returns error if the TOML is malformed or has mistyped fields
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and `HOME` is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model.name, "large-v2");
        assert_eq!(config.model.threads, 4);
        assert_eq!(config.model.beam_size, 5);
        assert!(config.model.download);
        assert!(config.model.path.is_none());
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::parse(
            r#"
[model]
name = "tiny"
beam_size = 1

[storage]
endpoint = "http://localhost:9000"
"#,
        )
        .unwrap();

        assert_eq!(config.model.name, "tiny");
        assert_eq!(config.model.beam_size, 1);
        assert_eq!(config.model.threads, 4);
        assert_eq!(
            config.storage.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(config.storage.fallback_enabled);
        assert_eq!(config.telemetry, TelemetryConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::parse("[model]\nthreads = \"many\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_fallback_enabled_by_default() {
        let fallback = StorageConfig::default().fallback().unwrap();
        assert_eq!(fallback.bucket, "sagemaker-us-east-1-905847418383");
        assert_eq!(fallback.key, "whisper/data/test/he/test-he-000.wav");
    }

    #[test]
    fn test_fallback_disabled() {
        let storage = StorageConfig {
            fallback_enabled: false,
            ..StorageConfig::default()
        };
        assert!(storage.fallback().is_none());
    }

    #[test]
    fn test_fallback_empty_bucket_is_disabled() {
        let storage = StorageConfig {
            fallback_bucket: String::new(),
            ..StorageConfig::default()
        };
        assert!(storage.fallback().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handler.toml");
        fs::write(&path, "[telemetry]\nenabled = true\nlog_path = \"/var/log/h.log\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.telemetry.enabled);
        assert_eq!(config.telemetry.log_path, "/var/log/h.log");
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = Config::load_from(Path::new("/nonexistent/handler.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let home = std::env::var("HOME").expect("HOME not set");
        let result = Config::expand_path("~/models/ggml-tiny.bin").unwrap();
        assert_eq!(result, PathBuf::from(home).join("models/ggml-tiny.bin"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let result = Config::expand_path("/opt/models").unwrap();
        assert_eq!(result, PathBuf::from("/opt/models"));
    }
}
