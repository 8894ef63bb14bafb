//! Webhook endpoint repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use domain::models::{EndpointChanges, NewEndpoint};

use crate::entities::WebhookEndpointEntity;
use crate::metrics::QueryTimer;

/// Repository for webhook endpoint database operations.
#[derive(Clone)]
pub struct WebhookEndpointRepository {
    pool: PgPool,
}

impl WebhookEndpointRepository {
    /// Creates a new WebhookEndpointRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new endpoint.
    pub async fn create(&self, input: &NewEndpoint) -> Result<WebhookEndpointEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_webhook_endpoint");
        let result = sqlx::query_as::<_, WebhookEndpointEntity>(
            r#"
            INSERT INTO webhook_endpoints (endpoint_id, name, url, secret, events, is_active,
                                           headers, max_retries, timeout_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(input.endpoint_id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(&input.secret)
        .bind(&input.events)
        .bind(input.is_active)
        .bind(Json(&input.headers))
        .bind(input.max_retries)
        .bind(input.timeout_ms)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a non-deleted endpoint by its public id.
    pub async fn find_by_endpoint_id(
        &self,
        endpoint_id: Uuid,
    ) -> Result<Option<WebhookEndpointEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_webhook_endpoint_by_id");
        let result = sqlx::query_as::<_, WebhookEndpointEntity>(
            r#"
            SELECT * FROM webhook_endpoints
            WHERE endpoint_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List non-deleted endpoints, oldest first.
    pub async fn list(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<WebhookEndpointEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_webhook_endpoints");
        let result = sqlx::query_as::<_, WebhookEndpointEntity>(
            r#"
            SELECT * FROM webhook_endpoints
            WHERE deleted_at IS NULL AND ($1 OR is_active)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Apply a partial update. Absent fields keep their stored value.
    pub async fn update(
        &self,
        endpoint_id: Uuid,
        changes: &EndpointChanges,
    ) -> Result<Option<WebhookEndpointEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_webhook_endpoint");
        let result = sqlx::query_as::<_, WebhookEndpointEntity>(
            r#"
            UPDATE webhook_endpoints
            SET name = COALESCE($2, name),
                url = COALESCE($3, url),
                events = COALESCE($4, events),
                headers = COALESCE($5, headers),
                max_retries = COALESCE($6, max_retries),
                timeout_ms = COALESCE($7, timeout_ms),
                is_active = COALESCE($8, is_active),
                updated_at = NOW()
            WHERE endpoint_id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(endpoint_id)
        .bind(&changes.name)
        .bind(&changes.url)
        .bind(&changes.events)
        .bind(changes.headers.as_ref().map(Json))
        .bind(changes.max_retries)
        .bind(changes.timeout_ms)
        .bind(changes.is_active)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Replace the signing secret.
    pub async fn set_secret(&self, endpoint_id: Uuid, secret: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("rotate_webhook_endpoint_secret");
        let result = sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET secret = $2, updated_at = NOW()
            WHERE endpoint_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(endpoint_id)
        .bind(secret)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    /// Soft delete: the row and its deliveries stay for audit.
    pub async fn soft_delete(&self, endpoint_id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("soft_delete_webhook_endpoint");
        let result = sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW()
            WHERE endpoint_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(endpoint_id)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    /// Active endpoints subscribed to the event type. Served by the GIN index.
    pub async fn find_active_subscribers(
        &self,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpointEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_webhook_subscribers");
        let result = sqlx::query_as::<_, WebhookEndpointEntity>(
            r#"
            SELECT * FROM webhook_endpoints
            WHERE deleted_at IS NULL
              AND is_active
              AND events @> ARRAY[$1]::TEXT[]
            ORDER BY id ASC
            "#,
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Bump delivery counters for one finished attempt. Runs inside the
    /// caller's transaction.
    pub(crate) async fn record_attempt_counters(
        conn: &mut PgConnection,
        endpoint_id: Uuid,
        success: bool,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET total_deliveries = total_deliveries + 1,
                successful_deliveries = successful_deliveries + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_deliveries = failed_deliveries + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_triggered_at = $3
            WHERE endpoint_id = $1
            "#,
        )
        .bind(endpoint_id)
        .bind(success)
        .bind(attempted_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
