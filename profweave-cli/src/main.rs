//! profweave - demo host for span-correlated profiling
//!
//! Runs synthetic work under a profiling integration and writes every
//! outbound envelope to disk as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use profweave_core::{ClientOptions, FileTransport, ProfilingClient, ProfilingOptions};

mod host;
mod synthetic;

use host::{DemoHost, Workload};
use synthetic::SyntheticEngine;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Profiling mode requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Fixed-length chunks for the whole run
    Continuous,
    /// One profile per root span
    Span,
}

#[derive(Parser, Debug)]
#[clap(
    name = "profweave",
    about = "Correlate CPU profiles with tracing spans",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run synthetic work under profiling and write envelopes to a directory
    Run {
        #[clap(long, value_enum, default_value = "span")]
        mode: RunMode,

        /// Total run time in milliseconds
        #[clap(long, default_value = "1000")]
        duration_ms: u64,

        /// Directory envelopes are written to
        #[clap(long)]
        output: PathBuf,

        /// Profiling options file (.yaml, .yml or .json)
        #[clap(long)]
        config: Option<PathBuf>,

        /// Number of root spans to run
        #[clap(long, default_value = "5")]
        spans: usize,

        /// Length of each root span in milliseconds
        #[clap(long, default_value = "50")]
        span_ms: u64,
    },

    /// Print the resolved profiling options as JSON
    Config {
        /// Profiling options file (.yaml, .yml or .json)
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Initialize tracing with CLI flags
///
/// Logs always go to stderr so stdout stays clean for command output.
fn initialize_tracing(log_level: &LogLevel, json_logs: bool) {
    let filter = EnvFilter::new(log_level.to_filter_directive());

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// File options, then `PROFWEAVE_*` environment overrides.
fn resolve_options(config: Option<&Path>) -> Result<ProfilingOptions> {
    let mut options = match config {
        Some(path) => ProfilingOptions::load_from_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => ProfilingOptions::default(),
    };
    options.apply_env_overrides();
    Ok(options)
}

/// Force the options into the requested mode.
fn apply_mode(mut options: ProfilingOptions, mode: RunMode) -> ProfilingOptions {
    match mode {
        RunMode::Continuous => options.profiles_sample_rate = None,
        RunMode::Span => {
            if !matches!(options.profiles_sample_rate, Some(rate) if rate > 0.0) {
                options.profiles_sample_rate = Some(1.0);
            }
        }
    }
    options
}

async fn run_command(
    mode: RunMode,
    duration: Duration,
    output: PathBuf,
    config: Option<PathBuf>,
    spans: usize,
    span_length: Duration,
) -> Result<()> {
    if span_length.is_zero() {
        bail!("--span-ms must be greater than zero");
    }

    let options = apply_mode(resolve_options(config.as_deref())?, mode);
    options.validate().context("Invalid profiling options")?;

    let transport = Arc::new(FileTransport::new(output.clone()));
    let client = Arc::new(ProfilingClient::new(
        ClientOptions::new(options),
        Arc::new(SyntheticEngine::new()),
        transport,
    ));

    let host = DemoHost::new(client)?;
    info!(
        mode = ?host.mode(),
        output = %output.display(),
        "Starting demo run"
    );

    let summary = host
        .run(&Workload {
            duration,
            spans,
            span_length,
        })
        .await?;

    println!(
        "{} transactions, {} span profiles written to {}",
        summary.transactions,
        summary.profiles,
        output.display()
    );
    Ok(())
}

fn config_command(config: Option<PathBuf>) -> Result<()> {
    let options = resolve_options(config.as_deref())?;
    options.validate().context("Invalid profiling options")?;
    let mode = ClientOptions::new(options.clone()).profiling_mode();

    let mut value = serde_json::to_value(&options)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("mode".to_string(), serde_json::to_value(mode)?);
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Command::Run {
            mode,
            duration_ms,
            output,
            config,
            spans,
            span_ms,
        } => {
            run_command(
                mode,
                Duration::from_millis(duration_ms),
                output,
                config,
                spans,
                Duration::from_millis(span_ms),
            )
            .await
        }
        Command::Config { config } => config_command(config),
    }
}
