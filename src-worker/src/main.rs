//! Leadflow search worker.
//!
//! Claims pending search jobs and runs them against the company-data provider.
//! Run it from an external scheduler with `--once`, or let it tick on its own
//! interval until Ctrl-C. Overlapping runs are safe: claims are atomic.

use anyhow::{Context, Result};
use clap::Parser;
use leadflow_core::AppConfig;
use leadflow_db::Database;
use leadflow_pipeline::{DatabaseAuditSink, LeadPipeline};
use leadflow_provider::HttpLeadProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "leadflow-worker", version)]
#[command(about = "Process pending Leadflow search jobs")]
struct Cli {
    /// Process at most one job, then exit
    #[arg(long)]
    once: bool,

    /// Seconds between ticks; overrides `worker.interval_secs`
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Configuration file; defaults to the per-user config path
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,leadflow=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Relative database paths live in the per-user data directory.
fn resolve_database_path(path: &str, data_dir: &Path) -> Result<String> {
    if path == ":memory:" || Path::new(path).is_absolute() {
        return Ok(path.to_string());
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let resolved = data_dir.join(path);
    resolved
        .to_str()
        .map(str::to_string)
        .context("database path is not valid UTF-8")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!("Starting Leadflow worker v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        AppConfig::load_with_env(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(secs) = cli.interval_secs {
        config.worker.interval_secs = secs.max(1);
    }
    let data_dir = AppConfig::data_dir().context("failed to locate data directory")?;
    config.database.path = resolve_database_path(&config.database.path, &data_dir)?;

    let db = Database::open(&config.database)
        .await
        .context("failed to open database")?;
    db.run_migrations().await.context("failed to run migrations")?;

    let provider = HttpLeadProvider::new(&config.provider)
        .context("failed to build provider client")?
        .with_audit_sink(Arc::new(DatabaseAuditSink::new(db.pool().clone())));
    let worker = LeadPipeline::new(db.clone(), Arc::new(provider), config.pipeline.clone()).worker();

    if cli.once {
        let outcome = worker.run_one_job().await.context("worker tick failed")?;
        info!(?outcome, "Single tick finished");
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    // Without a signal handler, keep running until killed
                    error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                    drop(shutdown_tx);
                }
            }
        });

        worker
            .run(Duration::from_secs(config.worker.interval_secs), shutdown_rx)
            .await;
    }

    db.close().await;
    Ok(())
}
