//! CLI entry point for loomrun.
//!
//! This binary provides the `loomrun` command with subcommands for
//! inspecting the model chain, chatting through it directly and executing
//! full agent runs that print AG-UI events.

mod chat_graph;
mod cli;
mod helpers;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use loomrun_agent::llm::{LlmResponse, Prompt};
use loomrun_agent::{LoomrunConfig, RunOrchestrator};
use loomrun_protocol::{Message, ProtocolEvent, RunInput};
use tracing::{error, info};
use uuid::Uuid;

use crate::chat_graph::ChatGraphEngine;
use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    helpers::init_tracing(&cli.log_level);
    helpers::load_dotenv();

    let config = LoomrunConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Models => cmd_models(&config),
        Commands::Chat {
            prompt,
            blocking,
            system,
        } => cmd_chat(&config, &prompt, blocking, system.as_deref()).await,
        Commands::Run {
            prompt,
            input,
            thread,
        } => {
            let input = match (input, prompt) {
                (Some(path), _) => helpers::read_run_input(&path)?,
                (None, Some(prompt)) => {
                    let thread = thread.unwrap_or_else(|| Uuid::now_v7().to_string());
                    RunInput::new(
                        thread,
                        Uuid::now_v7().to_string(),
                        vec![Message::user(Uuid::now_v7().to_string(), prompt)],
                    )
                }
                (None, None) => bail!("either a prompt or --input is required"),
            };
            cmd_run(&config, input).await
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: models
// ---------------------------------------------------------------------------

fn cmd_models(config: &LoomrunConfig) -> Result<()> {
    println!();
    println!("  Model chain (fallback order)");
    println!("  ============================");
    println!();

    if config.models.is_empty() {
        println!("  No models configured.");
        println!();
        return Ok(());
    }

    for (i, model) in config.models.iter().enumerate() {
        let key = match &model.api_key_env {
            None => "no key".to_owned(),
            Some(var) if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) => {
                format!("{var} set")
            }
            Some(var) => format!("{var} MISSING, skipped"),
        };
        println!(
            "  {}. {:<12} {:<24} {} ({key})",
            i + 1,
            model.name,
            model.model,
            model.base_url
        );
    }

    println!();
    println!("  Retry delay:      {} ms", config.fallback.retry_delay_ms);
    match config.thread_idle_ttl() {
        Some(ttl) => println!("  Thread idle TTL:  {} s", ttl.as_secs()),
        None => println!("  Thread idle TTL:  disabled"),
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(
    config: &LoomrunConfig,
    prompt: &str,
    blocking: bool,
    system: Option<&str>,
) -> Result<()> {
    let chain = config.build_chain()?;
    let system = system.or(config.agent.system_prompt.as_deref());
    let prompt = Prompt::from_user(system, prompt);

    if blocking {
        match chain.invoke(&prompt).await? {
            LlmResponse::Text(text) => println!("{text}"),
            LlmResponse::ToolCalls(calls) => {
                for call in calls {
                    println!("{} {}", call.name, call.arguments);
                }
            }
        }
        return Ok(());
    }

    let mut fragments = chain.stream_invoke(&prompt);
    let mut stdout = std::io::stdout().lock();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(config: &LoomrunConfig, input: RunInput) -> Result<()> {
    let chain = config.build_chain()?;
    let mut orchestrator = RunOrchestrator::new(
        Arc::new(ChatGraphEngine::new(chain)),
        Arc::new(config.input_builder()),
    );
    if let Some(ttl) = config.thread_idle_ttl() {
        orchestrator = orchestrator.with_idle_ttl(ttl);
    }

    info!(thread_id = %input.thread_id, run_id = %input.run_id, "executing run");
    let mut events = orchestrator.run_to_wire(input);
    let mut failed = None;

    let mut stdout = std::io::stdout().lock();
    while let Some(event) = events.next().await {
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        if let ProtocolEvent::RunError { message, code } = event {
            failed = Some((code, message));
        }
    }

    if let Some((code, message)) = failed {
        error!(code = %code, "run failed");
        bail!("run failed ({code}): {message}");
    }
    Ok(())
}
