use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use engram::{
    cache,
    config::ServiceConfig,
    crypto::ContentCrypto,
    db::DbPool,
    jobs::{self, NoopVectorIndex, TaskWorker, VectorCleanupHandler},
    observability, retention,
    services::Services,
};
use tokio_util::task::TaskTracker;

/// Multi-tenant conversation memory service.
///
/// Stores conversation history and per-client agent memory, with fork
/// lineage, group-scoped access control, and retention-driven eviction.
#[derive(Parser, Debug)]
#[command(name = "engram", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "engram.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match ServiceConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if args.check_config {
        println!("Configuration OK");
        return;
    }

    observability::init_tracing(&config.observability.logging);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let db = Arc::new(DbPool::from_config(&config.database).await?);
    if config.database.migrate_at_start() {
        db.run_migrations().await?;
    }
    db.health_check().await?;
    tracing::info!("Datastore ready");

    let crypto = Arc::new(ContentCrypto::from_config(&config.encryption)?);
    if crypto.is_enabled() {
        tracing::info!("Content encryption enabled");
    } else {
        tracing::warn!("No encryption key configured; content is stored in the clear");
    }

    let entry_cache = cache::from_config(&config.cache).await?;
    let cache_ttl = Duration::from_secs(config.cache.ttl_secs());

    let _services = Services::new(db.clone(), crypto, entry_cache, cache_ttl);
    tracing::info!("Services initialized; engine is ready for transport bindings");

    // Background loops run until shutdown. The vector index is an
    // external collaborator; without one configured, cleanup tasks
    // resolve against the no-op purge.
    let tracker = TaskTracker::new();

    let worker = TaskWorker::new(db.clone(), config.tasks.clone())
        .register(Arc::new(VectorCleanupHandler::new(Arc::new(NoopVectorIndex))));
    tracker.spawn(jobs::start_task_worker(worker));
    tracker.spawn(retention::start_eviction_worker(
        db.clone(),
        config.retention.clone(),
    ));
    tracker.close();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    Ok(())
}
