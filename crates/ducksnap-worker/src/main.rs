use std::sync::Arc;

use anyhow::{Context, Result};
use ducksnap_storage::Storage;
use ducksnap_worker::{
    DispatcherConfig, RedisConnector, SubjectSyncProcessor, TaskDispatcher, WorkerConfig,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment file first so it can set RUST_LOG / LOG_LEVEL too
    let env_file = dotenvy::dotenv();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ducksnap_worker={0},ducksnap_storage={0}", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ducksnap-worker starting...");
    if let Ok(path) = env_file {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    let config = WorkerConfig::from_env();
    tracing::info!(?config, "Worker configured");

    // Storage is constructed even without DATABASE_URL; calls fail individually
    let storage = Arc::new(Storage::postgres(config.database_url.clone()));
    let processor = Arc::new(SubjectSyncProcessor::new(storage));
    let connector =
        Arc::new(RedisConnector::from_config(&config).context("Invalid queue configuration")?);

    let mut dispatcher =
        TaskDispatcher::new(connector, processor, DispatcherConfig::from(&config));

    if let Err(e) = dispatcher.start().await {
        tracing::error!(error = %e, "Could not connect to the task queue. Exiting.");
        return Err(e).context("Startup failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing current task");
            let _ = shutdown_tx.send(true);
        }
    });

    dispatcher.run(shutdown_rx).await?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
