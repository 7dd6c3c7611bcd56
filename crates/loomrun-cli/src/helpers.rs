//! Shared helper functions used across CLI subcommands.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use loomrun_protocol::RunInput;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so that stdout carries only answers and events.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Load `.env` from the working directory, if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }
}

/// Read a JSON run input from `path`, or stdin when `path` is `-`.
pub fn read_run_input(path: &Path) -> Result<RunInput> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read run input from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    parse_run_input(&raw)
}

pub fn parse_run_input(raw: &str) -> Result<RunInput> {
    serde_json::from_str(raw).context("run input is not valid JSON")
}
