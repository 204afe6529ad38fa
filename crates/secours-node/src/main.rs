use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use secours_net::ConnectionManager;
use secours_node::{GossipEngine, NodeConfig};
use secours_shared::Identity;
use secours_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,secours_node=debug")),
        )
        .init();

    info!("Starting Secours node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    check_port(config.port)?;

    let db = Arc::new(Database::open_at(&config.db_path())?);
    let identity = Identity::load_or_generate(&config.identity_path())?;
    let transport = Arc::new(ConnectionManager::new());

    let engine = Arc::new(GossipEngine::new(
        Arc::clone(&db),
        Arc::clone(&transport),
        identity,
        config,
    ));

    let token = CancellationToken::new();
    let addr = Arc::clone(&engine).start(token.clone()).await?;
    info!(addr = %addr, node_id = %engine.node_id(), "gossip engine running");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    token.cancel();
    transport.close_all().await;

    Ok(())
}

/// Fail fast with a clear error when the gossip port is already taken,
/// before the store or identity files are touched.
fn check_port(port: u16) -> anyhow::Result<()> {
    std::net::TcpListener::bind(("0.0.0.0", port))
        .map_err(|e| anyhow::anyhow!("gossip port {port} is not available: {e}"))?;
    Ok(())
}
