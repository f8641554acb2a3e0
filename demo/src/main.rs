//! Concerto multi-agent runtime — Demo CLI
//!
//! Runs one or all of the demo scenarios. Each scenario wires real Concerto
//! components (bus, orchestrator, workflow engine, idempotency guard) to
//! in-memory collaborators and scripted agents.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- task
//!   cargo run -p demo -- workflow
//!   cargo run -p demo -- collaborate
//!   cargo run -p demo -- replay
//!   cargo run -p demo -- --config demo/config/concerto.toml run-all

mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use concerto_contracts::{config::RuntimeConfig, error::OrchestraResult};

use scenarios::{collaboration, content_pipeline, safe_replay, task_dispatch};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Concerto — multi-agent orchestration runtime demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Concerto multi-agent runtime demo",
    long_about = "Runs Concerto demo scenarios showing task dispatch, workflow execution,\n\
                  multi-agent collaboration, and idempotent step replay."
)]
struct Cli {
    /// Runtime configuration TOML. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Scenario 1: a single task round trip through the orchestrator.
    Task,
    /// Scenario 2: a JSON-defined workflow with parallel, loop and conditional steps.
    Workflow,
    /// Scenario 3: collaboration offers, accepted and declined.
    Collaborate,
    /// Scenario 4: idempotent steps, durable replay and quota denial.
    Replay,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(2);
        }
    };

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(&config),
        Command::Task => task_dispatch::run_scenario(&config),
        Command::Workflow => content_pipeline::run_scenario(&config),
        Command::Collaborate => collaboration::run_scenario(&config),
        Command::Replay => safe_replay::run_scenario(),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> OrchestraResult<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path),
        None => Ok(RuntimeConfig::default()),
    }
}

fn run_all(config: &RuntimeConfig) -> OrchestraResult<()> {
    task_dispatch::run_scenario(config)?;
    content_pipeline::run_scenario(config)?;
    collaboration::run_scenario(config)?;
    safe_replay::run_scenario()?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Concerto — Multi-agent Orchestration Runtime");
    println!("============================================");
    println!();
    println!("Per task:");
    println!("  [1] Registry claims the agent: Idle → Busy (check-and-set)");
    println!("  [2] task_request published on the priority bus to agent.<name>");
    println!("  [3] Agent handler runs on its worker pool; task_response resolves the waiter");
    println!("  [4] Agent released (Idle / Error); experience and working-memory note recorded");
    println!();
}
