mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use upstage::catalog::{AllowAll, Caller, SqliteCatalog};
use upstage::{ChunkStore, Config, DestinationCatalog, JobQueue, UploadSession, Worker};

/// Identity used for operator-driven commands; the ACL check is bypassed
/// with `AllowAll` since the operator already has filesystem access.
const OPERATOR: Caller = Caller { user_id: 0 };

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let store = Arc::new(ChunkStore::open(
        &config.chunk_storage,
        config.create_dirs,
        config.dir_mode,
    )?);
    let catalog = Arc::new(SqliteCatalog::open(&config.catalog_db)?);

    match cli.command {
        Command::Run => run_daemon(store, catalog, config).await,
        Command::Sweep => sweep_once(store, catalog, config).await,
        Command::Complete { destination_id } => {
            upstage::reassemble::run(&store, catalog.as_ref(), &config, destination_id)?;
            if !cli.quiet {
                println!(
                    "{} destination {} reassembled and queued for verification",
                    "✓".green().bold(),
                    destination_id
                );
            }
            Ok(())
        }
        Command::Status { destination_id } => {
            let (jobs, _rx) = JobQueue::new();
            let session = UploadSession::new(
                Arc::clone(&store),
                Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
                Arc::new(AllowAll),
                jobs,
                config,
            );
            let status = session.status(destination_id, &OPERATOR)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

/// Worker plus periodic janitor sweeps, until ctrl-c.
async fn run_daemon(
    store: Arc<ChunkStore>,
    catalog: Arc<SqliteCatalog>,
    config: Config,
) -> Result<()> {
    tracing::info!(
        "upstage v{} watching {}",
        env!("CARGO_PKG_VERSION"),
        config.chunk_storage.display()
    );

    let (jobs, rx) = JobQueue::new();
    let worker = Worker::new(
        Arc::clone(&store),
        Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
        config.clone(),
        rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_sweeps(&store, &catalog, &jobs).await {
                    tracing::error!("Janitor sweep failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    // Dropping the producer lets the worker drain and exit.
    drop(jobs);
    worker_handle.await?;
    Ok(())
}

/// One janitor pass plus processing of whatever it queued.
async fn sweep_once(
    store: Arc<ChunkStore>,
    catalog: Arc<SqliteCatalog>,
    config: Config,
) -> Result<()> {
    let (jobs, rx) = JobQueue::new();
    let (cleaned, enqueued) = {
        let store = Arc::clone(&store);
        let catalog = Arc::clone(&catalog);
        let jobs = jobs.clone();
        tokio::task::spawn_blocking(move || -> upstage::Result<(usize, usize)> {
            let cleaned = upstage::janitor::orphan_sweep(&store, catalog.as_ref())?;
            let enqueued = upstage::janitor::stalled_sweep(&store, catalog.as_ref(), &jobs)?;
            Ok((cleaned, enqueued))
        })
        .await??
    };

    drop(jobs);
    Worker::new(Arc::clone(&store), catalog as Arc<dyn DestinationCatalog>, config, rx)
        .run()
        .await;

    println!(
        "{} {} orphaned chunk sets removed, {} stalled uploads reassembled",
        "✓".green().bold(),
        cleaned,
        enqueued
    );
    Ok(())
}

async fn run_sweeps(
    store: &Arc<ChunkStore>,
    catalog: &Arc<SqliteCatalog>,
    jobs: &JobQueue,
) -> Result<()> {
    let store = Arc::clone(store);
    let catalog = Arc::clone(catalog);
    let jobs = jobs.clone();
    tokio::task::spawn_blocking(move || -> upstage::Result<()> {
        let cleaned = upstage::janitor::orphan_sweep(&store, catalog.as_ref())?;
        let enqueued = upstage::janitor::stalled_sweep(&store, catalog.as_ref(), &jobs)?;
        if cleaned > 0 || enqueued > 0 {
            tracing::info!(
                "Janitor pass: {} orphaned chunk sets removed, {} reassemblies queued",
                cleaned,
                enqueued
            );
        }
        Ok(())
    })
    .await??;
    Ok(())
}
