use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lesson_runtime::{
    config::Config,
    services::{remote::HttpRemote, sync_queue::SyncQueue, sync_worker::SyncWorker},
    storage::FileStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lesson_runtime=debug,sync_worker=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    // Exits here while the app holds the state directory.
    let store = Arc::new(
        FileStore::open(config.state_dir()).context("Failed to open state store")?,
    );
    let queue = Arc::new(SyncQueue::new(store));
    let remote = Arc::new(HttpRemote::new(
        config.remote_base_url.clone(),
        config.remote_timeout(),
    )?);

    tracing::info!("{} items pending sync", queue.len()?);

    let worker = SyncWorker::new(queue, remote, config.flush_interval());
    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    Ok(())
}
