//! Stashbot Daemon
//!
//! Chat bot that saves received attachments into a confined directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config, ENV_LOG_LEVEL};
use daemon::orchestrator::{BotOrchestrator, OrchestratorEvent};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Stashbot - saves chat attachments into a directory tree.
#[derive(Parser, Debug)]
#[command(name = "stashbot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bot until SIGINT or SIGTERM
    Start {
        /// Root directory for saved files (default: current directory)
        #[arg(long, short, value_name = "DIR")]
        root: Option<PathBuf>,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration with secrets redacted
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Load configuration
    let mut config = Config::load(&config_path)?;

    let level = effective_log_level(cli.verbose, &config);
    let _log_guard = init_tracing(&level, config.daemon.log_file.as_deref())?;

    // Environment values are erased once read
    config.apply_env_overrides()?;

    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Start { root } => {
            if let Some(root) = root {
                config.storage.root_dir = Some(root);
            }

            tracing::info!("Stashbot starting...");
            let orchestrator = BotOrchestrator::new(config)?;
            run_headless(&orchestrator).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.redacted().to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            init_config_file(&config_path, force)?;
            println!("Configuration written to {}", config_path.display());
        }
    }

    Ok(())
}

/// Log level used before environment overrides are applied.
///
/// `--verbose` wins, then the environment, then the config file. The
/// environment is only read here; it is erased later with the other overrides.
fn effective_log_level(verbose: bool, config: &Config) -> String {
    if verbose {
        return "debug".to_string();
    }
    std::env::var(ENV_LOG_LEVEL)
        .ok()
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| config.daemon.log_level.clone())
        .to_lowercase()
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. With a log file, a
/// daily-rolling non-blocking writer is added; the returned guard must live
/// until exit so buffered lines are flushed.
fn init_tracing(level: &str, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file has no file name: {}", path.display()))?;
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Write the default configuration unless a file exists.
fn init_config_file(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)
}

/// Run the bot until a shutdown signal arrives.
async fn run_headless(orchestrator: &BotOrchestrator) -> anyhow::Result<()> {
    // Subscribe before starting so no state change is missed
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::UpdateHandled { update_id } => {
                    tracing::trace!("Handled update {}", update_id);
                }
                OrchestratorEvent::PollFailed { message } => {
                    tracing::debug!("Poll failed: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;

    // Wait for shutdown signal (SIGTERM or SIGINT)
    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    let stats = orchestrator.stats().snapshot();
    tracing::info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        uptime = %daemon::format_duration(stats.uptime.as_secs()),
        "Stashbot stopped"
    );

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
