//! Storage gauges: delivery backlog per status, plus pool usage on PostgreSQL.

use std::sync::Arc;

use sqlx::PgPool;

use domain::services::WebhookStore;
use persistence::metrics::{record_delivery_backlog, record_pool_gauges};

use super::scheduler::{Job, JobFrequency};

pub struct StoreMetricsJob {
    store: Arc<dyn WebhookStore>,
    pool: Option<PgPool>,
}

impl StoreMetricsJob {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store, pool: None }
    }

    /// Also report connection pool gauges.
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

#[async_trait::async_trait]
impl Job for StoreMetricsJob {
    fn name(&self) -> &'static str {
        "store_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(15)
    }

    async fn execute(&self) -> Result<(), String> {
        if let Some(pool) = &self.pool {
            record_pool_gauges(pool);
        }

        let counts = self
            .store
            .count_deliveries_by_status()
            .await
            .map_err(|e| format!("Failed to count deliveries: {}", e))?;
        record_delivery_backlog(&counts);
        Ok(())
    }
}
