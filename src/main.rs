use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

use s3_whisper_handler::config::Config;
use s3_whisper_handler::{telemetry, Handler};

fn main() -> Result<()> {
    let config = Config::load()?;

    telemetry::init(&config.telemetry)?;
    tracing::info!("s3-whisper-handler starting");

    let model_dir = Config::model_dir()?;
    let handler = Handler::from_config(&model_dir, &config).context("failed to load handler")?;
    tracing::info!(model = %config.model.name, "model loaded, reading requests from stdin");

    // One JSON request per line, one JSON reply per line
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = handler.handle_json(&line);
        writeln!(stdout, "{reply}").context("failed to write reply")?;
        stdout.flush().context("failed to flush reply")?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
