use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use domain::services::WebhookStore;
use persistence::{InMemoryWebhookStore, PgWebhookStore};
use webhook_api::app::{create_app, AppState};
use webhook_api::config::{Config, StorageBackend};
use webhook_api::jobs::{DeliveryDispatchJob, JobScheduler, StoreMetricsJob};
use webhook_api::middleware::{init_metrics, logging::init_logging};
use webhook_api::services::HttpTransport;

/// How long in-flight jobs get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging);
    init_metrics().context("Failed to install Prometheus recorder")?;

    info!("Starting webhook delivery service v{}", env!("CARGO_PKG_VERSION"));

    let mut scheduler = JobScheduler::new();

    let (store, pool): (Arc<dyn WebhookStore>, Option<sqlx::PgPool>) =
        match config.storage.backend {
            StorageBackend::Postgres => {
                let db_config: persistence::db::DatabaseConfig = (&config.database).into();
                let pool = persistence::db::create_pool(&db_config)
                    .await
                    .context("Failed to connect to database")?;
                persistence::db::run_migrations(&pool).await?;
                let store: Arc<dyn WebhookStore> = Arc::new(PgWebhookStore::new(pool.clone()));
                (store, Some(pool))
            }
            StorageBackend::Memory => {
                info!("Using in-memory storage; data is lost on restart");
                let store: Arc<dyn WebhookStore> = Arc::new(InMemoryWebhookStore::new());
                (store, None)
            }
        };

    let mut store_metrics = StoreMetricsJob::new(store.clone());
    if let Some(pool) = pool {
        store_metrics = store_metrics.with_pool(pool);
    }
    scheduler.register(store_metrics);

    let transport = Arc::new(
        HttpTransport::new(config.webhooks.response_body_limit_bytes)
            .context("Failed to build HTTP client")?,
    );

    let addr = config.socket_addr()?;
    let interval_secs = config.webhooks.scheduler_interval_secs;
    let state = AppState::new(config, store, transport);

    scheduler.register(DeliveryDispatchJob::new(
        state.dispatcher.clone(),
        interval_secs,
    ));
    scheduler.start();

    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(SHUTDOWN_GRACE).await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
