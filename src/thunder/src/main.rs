//! Thunder: decides which CTA prompts a user is eligible to see.
//!
//! Main entry point that wires storage, the definition cache and the
//! decision service, then starts the server.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use thunder_api::ApiServer;
use thunder_cache::{
    BehaviourTagsRepository, CtaRepository, MemoryStore, RedisStore, StateMachineRepository,
    StaticDataCache,
};
use thunder_core::config::{AppConfig, StoreBackend};
use thunder_decision::{SdkService, StaticCohortsClient};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "thunder")]
#[command(about = "CTA decision service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "THUNDER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP bind host (overrides config)
    #[arg(long, env = "THUNDER__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "THUNDER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Keep definitions and snapshots in process memory instead of Redis
    #[arg(long, default_value_t = false)]
    memory_store: bool,
}

struct Stores {
    ctas: Arc<dyn CtaRepository>,
    behaviour_tags: Arc<dyn BehaviourTagsRepository>,
    state_machines: Arc<dyn StateMachineRepository>,
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store {
        StoreBackend::Redis => {
            let redis = Arc::new(RedisStore::new(&config.redis).await?);
            Ok(Stores {
                ctas: redis.clone(),
                behaviour_tags: redis.clone(),
                state_machines: redis,
            })
        }
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new());
            Ok(Stores {
                ctas: memory.clone(),
                behaviour_tags: memory.clone(),
                state_machines: memory,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thunder=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Thunder starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if cli.memory_store {
        config.store = StoreBackend::Memory;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.store,
        refresh_interval_ms = config.cache.refresh_interval_ms,
        "Configuration loaded"
    );

    let stores = open_stores(&config).await?;

    // Definitions must be loadable before serving traffic
    let cache = Arc::new(StaticDataCache::new(stores.ctas, stores.behaviour_tags));
    cache.initiate().await?;
    let _refresh = cache.spawn_refresh_loop(Duration::from_millis(config.cache.refresh_interval_ms));

    let service = Arc::new(SdkService::new(
        cache,
        stores.state_machines,
        Arc::new(StaticCohortsClient::new(config.cohorts.default_cohorts.clone())),
        config.tenants.clone(),
    ));

    let api_server = ApiServer::new(config.clone(), service);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Thunder is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
