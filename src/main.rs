//! Policity - incident report pipeline service
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API (Gemini backend when GOOGLE_API_KEY is set)
//! cargo run --release
//!
//! # One retention sweep, then exit
//! cargo run --release -- purge
//!
//! # Dump a stored incident as JSON
//! cargo run --release -- inspect INC-20250101-0001A2B
//! ```
//!
//! # Environment Variables
//!
//! - `POLICITY_CONFIG`: path to a TOML config file
//! - `POLICITY_BIND_ADDRESS`, `POLICITY_DATA_DIR`: override the config file
//! - `POLICITY_CORS_ORIGINS`: comma-separated allowed origins
//! - `GOOGLE_API_KEY`: reasoning backend credentials
//! - `RUST_LOG`: logging filter (default: `logging.level`)
//! - `RESET_DB`: set to "true" to wipe the store on startup

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use policity::api::{create_app, ApiState};
use policity::background::RetentionSweeper;
use policity::config::{LogFormat, LoggingConfig, ServiceConfig};
use policity::storage::SledStore;
use policity::PipelineService;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "policity")]
#[command(about = "Incident report pipeline service")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides POLICITY_CONFIG)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long, env = "POLICITY_BIND_ADDRESS")]
    addr: Option<String>,

    /// Override the sled data directory
    #[arg(long, env = "POLICITY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Wipe all stored incidents on startup.
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug, Default)]
enum SubCommand {
    /// Run the HTTP API and background tasks
    #[default]
    Serve,
    /// Run one retention sweep and exit
    Purge,
    /// Print the stored incident and its stage outputs as JSON
    Inspect {
        incident_id: String,
    },
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &CliArgs) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServiceConfig::load(),
    };
    config.apply_env_overrides();

    if let Some(addr) = &args.addr {
        config.server.bind_address.clone_from(addr);
    }
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir.clone_from(dir);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Logging config has to be known before the full config is, so peek at it
/// without the log lines `ServiceConfig::load` would emit.
fn logging_config(args: &CliArgs) -> LoggingConfig {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var("POLICITY_CONFIG").ok().map(PathBuf::from));
    path.and_then(|p| ServiceConfig::load_from_file(&p).ok())
        .map(|c| c.logging)
        .unwrap_or_default()
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

fn reset_data_directory(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!(path = %data_dir.display(), "RESET_DB detected, wiping all stored incidents");
    std::fs::remove_dir_all(data_dir)
        .with_context(|| format!("Failed to remove {}", data_dir.display()))?;
    Ok(())
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    RetentionSweeper,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::RetentionSweeper => write!(f, "RetentionSweeper"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

fn spawn_retention_sweeper(
    task_set: &mut JoinSet<Result<TaskName>>,
    sweeper: RetentionSweeper,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        sweeper.run(cancel_token).await;
        Ok(TaskName::RetentionSweeper)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe the cancellation and wind down.
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn install_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        info!("Received shutdown signal, initiating shutdown");
        token.cancel();
    });
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(config: ServiceConfig, store: SledStore) -> Result<()> {
    let service = Arc::new(
        PipelineService::from_config(&config, Arc::new(store.clone()))
            .context("Failed to build pipeline service")?,
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(addr = %config.server.bind_address, "HTTP API listening");

    let app = create_app(ApiState::new(Arc::clone(&service)), config.server.max_body_bytes);

    let cancel_token = CancellationToken::new();
    install_shutdown_signal(cancel_token.clone());

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_retention_sweeper(
        &mut task_set,
        RetentionSweeper::new(Arc::clone(&service), &config.storage),
        cancel_token.clone(),
    );

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    service.shutdown().await;
    store.flush().await?;
    outcome
}

fn purge(config: &ServiceConfig, store: SledStore) -> Result<()> {
    let service = PipelineService::from_config(config, Arc::new(store))
        .context("Failed to build pipeline service")?;
    let purged = service
        .purge_expired(config.storage.retention())
        .context("Retention sweep failed")?;
    info!(purged = purged.len(), "Retention sweep complete");
    Ok(())
}

fn inspect(config: &ServiceConfig, store: SledStore, incident_id: &str) -> Result<()> {
    let service = PipelineService::from_config(config, Arc::new(store))
        .context("Failed to build pipeline service")?;
    let detail = service
        .get_incident(incident_id)
        .with_context(|| format!("Failed to read incident {incident_id}"))?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    init_logging(&logging_config(&args));

    let config = load_config(&args)?;

    // Reset DB check, before the store is opened
    if should_reset_db(args.reset_db) {
        reset_data_directory(&config.storage.data_dir)?;
    }

    let store = SledStore::open(&config.storage.data_dir)?;

    match args.command.unwrap_or_default() {
        SubCommand::Serve => serve(config, store).await?,
        SubCommand::Purge => purge(&config, store)?,
        SubCommand::Inspect { incident_id } => inspect(&config, store, &incident_id)?,
    }

    info!("Policity shutdown complete");
    Ok(())
}
