//! Audience Express: customer segmentation and audience sizing service.
//!
//! Main entry point that loads configuration, opens the customer and
//! segment stores and starts the server.

use audience_api::ApiServer;
use audience_core::config::{AppConfig, StoreBackend};
use audience_segmentation::{CustomerStore, SegmentStore};
use audience_store::{MemoryStore, RedisStore};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "audience-express")]
#[command(about = "Customer segmentation and audience sizing service")]
#[command(version)]
struct Cli {
    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, env = "AUDIENCE_EXPRESS_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Store backend: memory or redis (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__STORE__BACKEND")]
    store: Option<StoreBackend>,
}

type Stores = (Arc<dyn CustomerStore>, Arc<dyn SegmentStore>);

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store))
        }
        StoreBackend::Redis => {
            let store = Arc::new(RedisStore::connect(&config.redis).await?);
            Ok((store.clone(), store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audience_express=info,audience_segmentation=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Audience Express starting up");

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.store {
        config.store.backend = backend;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let (customers, segments) = open_stores(&config).await?;

    let api_server = ApiServer::new(config.clone(), customers, segments);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        warn!(error = %e, "Failed to start metrics exporter");
    }

    info!("Audience Express is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
