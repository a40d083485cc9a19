use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};
use url::Url;

use protocol_user_indexer::api;
use protocol_user_indexer::indexer::rpc::RpcChainClient;
use protocol_user_indexer::indexer::{SchedulerConfig, run_indexers};
use protocol_user_indexer::metrics::Metrics;
use protocol_user_indexer::models::common::Config;
use protocol_user_indexer::storage::Store;
use protocol_user_indexer::storage::sqlite::SqliteStore;
use protocol_user_indexer::utils::load_config;
use protocol_user_indexer::utils::retry::RetryConfig;

#[derive(Parser, Debug)]
#[command(name = "protocol-user-indexer")]
#[command(about = "Indexes the users of on-chain protocols from their transactions and events")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short = 'c', global = true, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every definition once, up to a window below the chain head.
    Index,
    /// Serve the read-only query API.
    Serve,
    /// Create the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config(&cli.config) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    match cli.command {
        Commands::Index => index(config).await,
        Commands::Serve => serve(config).await,
        Commands::Migrate => {
            open_store(&config)?;
            info!("Schema is up to date");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open database at {}", config.database_path))
}

async fn index(config: Config) -> Result<ExitCode> {
    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Metrics::new()?;
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    let store: Arc<dyn Store> = Arc::new(open_store(&config)?);

    let rpc_url: Url = config.rpc_url.parse().context("invalid rpc_url")?;
    info!("RPC URL: {}", rpc_url);
    let client = Arc::new(RpcChainClient::connect(
        rpc_url,
        RetryConfig::from(&config.retry),
        metrics.clone(),
    ));

    // Stop between windows on Ctrl+C. A window being committed always finishes.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, stopping after in-flight commits...");
            let _ = shutdown_tx.send(true);
        }
    });

    println!();
    info!("========================= STARTING INDEXER =========================");

    let report = run_indexers(
        client,
        store,
        SchedulerConfig::from(&config),
        shutdown_rx,
        metrics,
    )
    .await?;

    for (definition_id, outcome) in report.completed() {
        info!(
            definition_id,
            from_checkpoint = outcome.from_checkpoint,
            checkpoint = outcome.checkpoint,
            windows = outcome.windows,
            users = outcome.users,
            "Completed"
        );
    }
    for (definition_id, reason) in report.skipped() {
        warn!(definition_id, "Skipped: {}", reason);
    }
    for error in report.failed() {
        error!(definition_id = error.definition_id(), class = error.class().as_str(), "{}", error);
    }

    if report.has_failures() {
        error!("Run finished with failures; re-run to resume from the last checkpoints");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

async fn serve(config: Config) -> Result<ExitCode> {
    let store: Arc<dyn Store> = Arc::new(open_store(&config)?);

    println!();
    info!("=========================== STARTING API ===========================");

    api::serve(store, &config.api.address, config.api.port).await?;
    Ok(ExitCode::SUCCESS)
}
