use goal_trail::{
    api::{start_server, ApiState},
    config::Config,
    remote::FunctionsClient,
    storage::FileStorage,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    info!("🚀 Goal Trail - API Server");
    info!("📍 Port: {}", config.port);
    info!("💾 Data dir: {}", config.data_dir.display());

    let storage = Arc::new(FileStorage::open(&config.data_dir)?);
    let client = FunctionsClient::from_config(&config)?;
    let state = ApiState::with_client(storage, client);

    info!("✅ Stores loaded");
    info!("📡 Starting API server...");

    start_server(state, config.port).await?;

    Ok(())
}
