use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use piazza::config::{Cli, Config};
use piazza::handlers::AppContext;
use piazza::notify::NotificationService;
use piazza::rates::{RateClient, DEFAULT_RATE_URL};
use piazza::rewards::RewardIssuer;
use piazza::server::Server;
use piazza::store::snapshot::run_snapshot_task;
use piazza::store::DataStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let storage_path = config.storage_path().clone();

    // Restore persisted state, if any
    let store = Arc::new(DataStore::restore_or_create(&storage_path));

    let ctx = Arc::new(AppContext {
        notifier: Arc::new(NotificationService::new(Arc::clone(&store))),
        rates: Arc::new(RateClient::new(DEFAULT_RATE_URL)),
        config: config.clone(),
        store: Arc::clone(&store),
    });

    // Background tasks: periodic persistence and the reward engine
    tokio::spawn(run_snapshot_task(
        Arc::clone(&store),
        storage_path,
        Duration::from_secs(config.storage.snapshot_secs),
    ));
    tokio::spawn(RewardIssuer::new(store, &config).run());

    let server = Server::bind(ctx).await?;
    tracing::info!("Listening on {}", server.local_addr()?);
    server.run().await
}
