//! Webhook attempt repository.
//!
//! Attempts are only ever inserted as part of a delivery transition, so the
//! insert runs on the caller's transaction.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use domain::models::NewAttempt;

use crate::entities::WebhookAttemptEntity;
use crate::metrics::QueryTimer;

/// Repository for webhook attempt operations.
#[derive(Clone)]
pub struct WebhookAttemptRepository {
    pool: PgPool,
}

impl WebhookAttemptRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All attempts for a delivery, in attempt order.
    pub async fn find_by_delivery_id(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<WebhookAttemptEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_webhook_attempts_by_delivery");
        let result = sqlx::query_as::<_, WebhookAttemptEntity>(
            r#"
            SELECT * FROM webhook_attempts
            WHERE delivery_id = $1
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(delivery_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Append an attempt. The unique (delivery_id, attempt_number) constraint
    /// rejects duplicate numbering.
    pub(crate) async fn insert(
        conn: &mut PgConnection,
        attempt: &NewAttempt,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_attempts (
                attempt_id, delivery_id, attempt_number, request_url, request_headers,
                response_status, response_headers, response_body, response_time_ms,
                success, error_message, error_type, attempted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(attempt.attempt_id)
        .bind(attempt.delivery_id)
        .bind(attempt.attempt_number)
        .bind(&attempt.request_url)
        .bind(Json(&attempt.request_headers))
        .bind(attempt.response_status)
        .bind(Json(&attempt.response_headers))
        .bind(&attempt.response_body)
        .bind(attempt.response_time_ms)
        .bind(attempt.success)
        .bind(&attempt.error_message)
        .bind(attempt.error_type.map(|e| e.as_str()))
        .bind(attempt.attempted_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
