//! Storage metrics: per-operation query latency, connection pool gauges and
//! the delivery backlog.

use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use sqlx::PgPool;
use tracing::warn;

use domain::models::DeliveryStatus;

/// Store operations slower than this are logged.
const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// Times one store operation and records it under `webhook_store_query_seconds`.
///
/// ```ignore
/// let timer = QueryTimer::new("claim_due_webhook_deliveries");
/// let result = sqlx::query_as::<_, WebhookDeliveryEntity>(...).fetch_all(&pool).await;
/// timer.record();
/// result
/// ```
pub struct QueryTimer {
    operation: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        let elapsed = self.start.elapsed();
        histogram!("webhook_store_query_seconds", "operation" => self.operation)
            .record(elapsed.as_secs_f64());
        if elapsed >= SLOW_QUERY_THRESHOLD {
            warn!(
                operation = self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow webhook store query"
            );
        }
    }
}

/// Connection pool gauges, labelled by connection state.
pub fn record_pool_gauges(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("webhook_store_connections", "state" => "active").set(size.saturating_sub(idle) as f64);
    gauge!("webhook_store_connections", "state" => "idle").set(idle as f64);
}

/// Deliveries per status. Every status is set so a drained queue reads zero
/// instead of keeping its last value.
pub fn record_delivery_backlog(counts: &[(DeliveryStatus, i64)]) {
    for status in DeliveryStatus::ALL {
        let count = counts
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n);
        gauge!("webhook_deliveries", "status" => status.as_str()).set(count as f64);
    }
}
