use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, ModelConfig};

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Maps a model variant to its ggml filename
#[must_use]
pub fn model_filename(variant: &str) -> String {
    format!("ggml-{variant}.bin")
}

/// Resolves where the weights for the configured variant live
///
/// An explicit `model.path` wins; otherwise the file sits in `model_dir`.
///
/// # Errors
/// Returns error if `model.path` uses `~/` and `HOME` is unset
pub fn weights_path(model_dir: &Path, model: &ModelConfig) -> Result<PathBuf> {
    match &model.path {
        Some(path) => Config::expand_path(path),
        None => Ok(model_dir.join(model_filename(&model.name))),
    }
}

/// Ensures the weights are on disk, returns true if downloaded, false if already present
///
/// # Errors
/// Returns error if the download or the final rename fails
pub fn ensure_model_downloaded(variant: &str, model_path: &Path) -> Result<bool> {
    if model_path.exists() {
        tracing::info!(
            path = %model_path.display(),
            "model weights present, skipping download"
        );
        return Ok(false);
    }

    tracing::info!(
        model = variant,
        path = %model_path.display(),
        "model weights not found, starting download"
    );

    download_model(variant, model_path)?;

    Ok(true)
}

fn download_model(variant: &str, model_path: &Path) -> Result<()> {
    let url = format!("{MODEL_BASE_URL}/{}", model_filename(variant));

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).context("failed to create model directory")?;
    }

    tracing::info!(url = %url, "downloading model weights");

    // Stream into a sibling file and rename, so a partial download never looks complete
    let temp_path = model_path.with_extension("tmp");

    let mut response = reqwest::blocking::get(&url)
        .with_context(|| format!("failed to download model from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {}", response.status(), url);
    }

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;

    let size = response
        .copy_to(&mut file)
        .context("failed to write model weights to temp file")?;

    drop(file);

    fs::rename(&temp_path, model_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            model_path.display()
        )
    })?;

    tracing::info!(
        path = %model_path.display(),
        size,
        "model weights downloaded"
    );

    Ok(())
}
