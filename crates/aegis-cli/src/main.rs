//! Aegis operator CLI.
//!
//! Inspect the effective resilience configuration and watch breakers and
//! fallbacks react to a failing model without calling one.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_runtime::config::parse_duration;
use aegis_runtime::{
    ConfigError, Fallback, HealthSnapshot, ResilienceOrchestrator, ResultSource, RunOptions,
    RuntimeConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aegis", version, about = "AI call resilience layer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as JSON and validate it
    Config {
        /// YAML file to load instead of the environment
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Drive the orchestrator against a model that fails N times
    Simulate {
        /// Calls that fail before the model recovers
        #[arg(long, default_value_t = 3)]
        failures: u32,

        /// Consecutive failures that open the circuit
        #[arg(long, default_value_t = 5)]
        threshold: u32,

        /// Retries per run
        #[arg(long, default_value_t = 2)]
        retries: u32,

        #[arg(long, default_value_t = 5)]
        runs: u32,

        /// First backoff delay ("100ms", "1s", or plain milliseconds)
        #[arg(long, default_value = "100ms", value_parser = parse_duration)]
        base_delay: Duration,
    },
}

#[derive(Serialize)]
struct RunReport {
    run: u32,
    value: Option<String>,
    source: Option<ResultSource>,
    attempts: u32,
    error: Option<String>,
}

#[derive(Serialize)]
struct SimulationReport {
    runs: Vec<RunReport>,
    health: HealthSnapshot,
}

fn load_config(file: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match file {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => RuntimeConfig::from_env().context("Failed to read config from environment"),
    }
}

fn show_config(file: Option<PathBuf>) -> Result<ExitCode> {
    let config = load_config(file.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    match config.validate() {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(ConfigError::Invalid(problems)) => {
            for problem in problems {
                eprintln!("invalid: {problem}");
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn simulate(
    failures: u32,
    threshold: u32,
    retries: u32,
    runs: u32,
    base_delay: Duration,
) -> Result<ExitCode> {
    let mut config = RuntimeConfig::from_env().context("Failed to read config from environment")?;
    config.circuit_breaker.failure_threshold = threshold;
    config.retry.max_retries = retries;
    config.retry.base_delay = base_delay;

    let orchestrator = ResilienceOrchestrator::new(config);
    let calls = Arc::new(AtomicU32::new(0));
    let mut reports = Vec::new();

    for run in 1..=runs {
        let primary = {
            let calls = Arc::clone(&calls);
            move || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= failures {
                        anyhow::bail!("simulated model failure {call}/{failures}");
                    }
                    Ok(format!("model answer #{call}"))
                }
            }
        };

        let outcome = orchestrator
            .run(
                "simulation",
                primary,
                Fallback::value("heuristic answer".to_string()),
                RunOptions::default(),
            )
            .await;

        reports.push(match outcome {
            Ok(resolved) => RunReport {
                run,
                value: Some(resolved.value),
                source: Some(resolved.source),
                attempts: resolved.attempts,
                error: None,
            },
            Err(e) => RunReport {
                run,
                value: None,
                source: None,
                attempts: 0,
                error: Some(format!("{e:#}")),
            },
        });
    }

    let report = SimulationReport {
        runs: reports,
        health: orchestrator.metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    orchestrator.shutdown();

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Config { file } => show_config(file),
        Command::Simulate {
            failures,
            threshold,
            retries,
            runs,
            base_delay,
        } => simulate(failures, threshold, retries, runs, base_delay).await,
    }
}
