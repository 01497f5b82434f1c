//! kstream CLI - read and write partitioned stream shards.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kstream_core::config::LogFormat;
use kstream_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Stream service error (discovery, iterators, writes)
    StreamError = 2,
    /// Lease table error
    CheckpointError = 3,
    /// Reading stdin or writing stdout failed
    IoError = 4,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code, by type where possible and by
    /// message otherwise.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(e) = error.downcast_ref::<kstream_core::Error>() {
            return match e {
                kstream_core::Error::Config(_) | kstream_core::Error::Serialization(_) => {
                    ExitCode::ConfigError
                }
                kstream_core::Error::Stream(_) => ExitCode::StreamError,
                kstream_core::Error::Checkpoint(_) => ExitCode::CheckpointError,
                kstream_core::Error::Io(_) => ExitCode::IoError,
                kstream_core::Error::Shutdown => ExitCode::SignalInterrupt,
            };
        }

        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("stream") || error_str.contains("shard") {
            ExitCode::StreamError
        } else if error_str.contains("lease") || error_str.contains("checkpoint") {
            ExitCode::CheckpointError
        } else if error.downcast_ref::<std::io::Error>().is_some() {
            ExitCode::IoError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "kstream")]
#[command(about = "Bounded, checkpointed shard consumption for partitioned streams", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the shards of the stream
    Shards {
        /// Override stream name
        #[arg(long)]
        stream: Option<String>,

        /// Print one encoded split per shard, anchored at this path
        #[arg(long)]
        anchor: Option<String>,
    },

    /// Read every shard until closed, timed out or idle, as JSON lines
    Consume {
        /// Override stream name
        #[arg(long)]
        stream: Option<String>,

        /// Override the iteration number used for checkpoint lookup
        #[arg(long)]
        iteration: Option<u32>,

        /// Print Prometheus metrics to stderr when done
        #[arg(long)]
        print_metrics: bool,
    },

    /// Send each stdin line as one record
    Produce {
        /// Override stream name
        #[arg(long)]
        stream: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_directive()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout carries records, so logs go to stderr
    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    let result = execute_command(cli).await;

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Shards { stream, anchor } => {
            let config = load_config(cli.config.as_deref(), stream)?;
            commands::shards::run(config, anchor).await?;
        }

        Commands::Consume {
            stream,
            iteration,
            print_metrics,
        } => {
            let mut config = load_config(cli.config.as_deref(), stream)?;
            if let Some(iteration) = iteration {
                config.checkpoint.iteration_number = iteration;
            }
            commands::consume::run(config, print_metrics).await?;
        }

        Commands::Produce { stream } => {
            let config = load_config(cli.config.as_deref(), stream)?;
            commands::produce::run(config).await?;
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref(), None)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the config file and apply the stream override.
///
/// Without a config file, `--stream` alone is enough to run with defaults.
fn load_config(path: Option<&Path>, stream: Option<String>) -> Result<Config> {
    let mut config = match (path, &stream) {
        (Some(path), _) => read_config(path)?,
        (None, Some(name)) => Config::for_stream(name.clone()),
        (None, None) => read_config(Path::new("config.toml"))?,
    };

    if let Some(name) = stream {
        config.stream.name = name;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    Config::from_file(path)
        .with_context(|| format!("Failed to load config file {}", path.display()))
}
