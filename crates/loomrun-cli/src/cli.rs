//! CLI argument definitions for loomrun.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// loomrun -- agent runs streamed as AG-UI events.
#[derive(Parser)]
#[command(
    name = "loomrun",
    version,
    about = "loomrun -- agent run orchestrator with model fallback",
    long_about = "Drives agent runs against a chain of OpenAI-compatible models, retrying \
                  transient failures and falling back to the next model, and streams the \
                  result as AG-UI protocol events."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the model chain in fallback order.
    Models,

    /// Send one prompt through the model chain and print the answer.
    Chat {
        /// The user message.
        prompt: String,

        /// Wait for the complete answer instead of streaming it.
        #[arg(long)]
        blocking: bool,

        /// Override the configured system prompt.
        #[arg(long)]
        system: Option<String>,
    },

    /// Execute one agent run and print its protocol events as JSON lines.
    Run {
        /// The user message.  Ignored when `--input` is given.
        prompt: Option<String>,

        /// Read a complete run input (JSON) from this file, or `-` for stdin.
        #[arg(long, short, conflicts_with = "prompt")]
        input: Option<PathBuf>,

        /// Thread to run on.  Defaults to a fresh one.
        #[arg(long, short)]
        thread: Option<String>,
    },
}
