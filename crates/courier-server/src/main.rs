//! # courier-server
//!
//! This binary provides:
//! - **WebSocket relay** at `/ws`: persist, route, and acknowledge messages
//!   between authenticated users
//! - **REST API** (axum) for sending, history, presence, and diagnostics
//! - **Presence** in Redis when `REDIS_URL` is set, in-process otherwise

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_server::api::{self, AppState};
use courier_server::auth::Authenticator;
use courier_server::batch::DeliveryBatcher;
use courier_server::config::ServerConfig;
use courier_server::delivery::DeliveryPipeline;
use courier_server::hub::Hub;
use courier_server::presence::{MemoryPresenceStore, PresenceStore, RedisPresenceStore};
use courier_server::store::SqliteMessageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        database = %config.database_path.display(),
        redis = config.redis_url.is_some(),
        env = %config.app_env,
        "Loaded configuration"
    );

    let authenticator =
        Authenticator::from_config(&config).context("JWT key material is not usable")?;

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Arc::new(
        SqliteMessageStore::open(&config.database_path)
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?,
    );

    let presence: Arc<dyn PresenceStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisPresenceStore::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            info!("REDIS_URL not set, using in-process presence");
            Arc::new(MemoryPresenceStore::new())
        }
    };

    let hub = Arc::new(Hub::new(presence).with_presence_timeout(config.presence_timeout));
    let mut pipeline = DeliveryPipeline::new(hub, store);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    if let Some(interval) = config.delivery_batch_interval {
        let batcher = DeliveryBatcher::spawn(pipeline.dispatcher().clone(), interval);
        pipeline = pipeline.with_batcher(batcher);
    }

    let app_state = AppState::new(&config, pipeline, authenticator);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
