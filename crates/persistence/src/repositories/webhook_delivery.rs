//! Webhook delivery repository.
//!
//! Provides data access for deliveries: idempotent creation, lease-based
//! claiming for the dispatcher, and the transactional attempt write.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use domain::models::{DeliveryFilter, Lease, NewDelivery};
use domain::services::AttemptRecord;

use super::{WebhookAttemptRepository, WebhookEndpointRepository};
use crate::entities::WebhookDeliveryEntity;
use crate::metrics::QueryTimer;

/// Repository for webhook delivery operations.
#[derive(Clone)]
pub struct WebhookDeliveryRepository {
    pool: PgPool,
}

impl WebhookDeliveryRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending delivery unless one with the same idempotency key
    /// already exists. Returns the stored row and whether it was created here.
    pub async fn create_if_absent(
        &self,
        input: &NewDelivery,
    ) -> Result<(WebhookDeliveryEntity, bool), sqlx::Error> {
        let timer = QueryTimer::new("create_webhook_delivery");
        let inserted = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            INSERT INTO webhook_deliveries (delivery_id, endpoint_id, event_type, source_event_id,
                                            payload, payload_hash, idempotency_key, status,
                                            attempts, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(input.delivery_id)
        .bind(input.endpoint_id)
        .bind(&input.event_type)
        .bind(&input.source_event_id)
        .bind(&input.payload)
        .bind(&input.payload_hash)
        .bind(&input.idempotency_key)
        .bind(input.max_attempts)
        .fetch_optional(&self.pool)
        .await;

        let result = match inserted {
            Ok(Some(entity)) => Ok((entity, true)),
            Ok(None) => sqlx::query_as::<_, WebhookDeliveryEntity>(
                r#"SELECT * FROM webhook_deliveries WHERE idempotency_key = $1"#,
            )
            .bind(&input.idempotency_key)
            .fetch_one(&self.pool)
            .await
            .map(|entity| (entity, false)),
            Err(e) => Err(e),
        };
        timer.record();
        result
    }

    /// Find delivery by ID.
    pub async fn find_by_delivery_id(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_webhook_delivery_by_id");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"SELECT * FROM webhook_deliveries WHERE delivery_id = $1"#,
        )
        .bind(delivery_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List deliveries newest first, with optional filters and keyset cursor.
    pub async fn list(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<Vec<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_webhook_deliveries");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::UUID IS NULL OR endpoint_id = $2)
              AND ($3::TEXT IS NULL OR event_type = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR (created_at, id) < ($4, $5))
            ORDER BY created_at DESC, id DESC
            LIMIT $6
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.endpoint_id)
        .bind(&filter.event_type)
        .bind(filter.before.map(|c| c.created_at))
        .bind(filter.before.map(|c| c.id).unwrap_or(0))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Claim one delivery if it is pending and due.
    ///
    /// The status predicate is re-checked under the row lock, so of two
    /// concurrent claimers exactly one gets the row.
    pub async fn claim(
        &self,
        delivery_id: Uuid,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_webhook_delivery");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'processing', lease_token = $2, lease_expires_at = $3, updated_at = NOW()
            WHERE delivery_id = $1
              AND status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= $4)
            RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(lease.token)
        .bind(lease.expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Claim a delivery for an operator retry, ignoring its schedule.
    ///
    /// An exhausted delivery is granted one more attempt of budget; the
    /// attempt counter is left alone.
    pub async fn claim_for_manual_retry(
        &self,
        delivery_id: Uuid,
        lease: &Lease,
    ) -> Result<Option<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_webhook_delivery_manual_retry");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'processing',
                lease_token = $2,
                lease_expires_at = $3,
                next_retry_at = NULL,
                completed_at = NULL,
                max_attempts = GREATEST(max_attempts, attempts + 1),
                updated_at = NOW()
            WHERE delivery_id = $1
              AND status IN ('pending', 'failed', 'dead_letter')
            RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(lease.token)
        .bind(lease.expires_at)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Claim a batch of due deliveries. `SKIP LOCKED` hands concurrent
    /// schedulers disjoint batches.
    pub async fn claim_due(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_due_webhook_deliveries");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            WITH due AS (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= $1)
                ORDER BY COALESCE(next_retry_at, created_at) ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_deliveries d
            SET status = 'processing', lease_token = $3, lease_expires_at = $4, updated_at = NOW()
            FROM due
            WHERE d.id = due.id
            RETURNING d.*
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease.token)
        .bind(lease.expires_at)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Delivery counts grouped by status.
    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let timer = QueryTimer::new("count_webhook_deliveries_by_status");
        let result = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM webhook_deliveries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Return deliveries whose worker lease has expired to pending.
    pub async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("release_expired_webhook_leases");
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', lease_token = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE status = 'processing' AND lease_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// End a claimed delivery as `failed` without an attempt.
    pub async fn cancel(
        &self,
        delivery_id: Uuid,
        lease_token: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("cancel_webhook_delivery");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed',
                error_message = $3,
                completed_at = $4,
                next_retry_at = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'processing' AND lease_token = $2
            RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(lease_token)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Apply a finished attempt in one transaction: update the delivery
    /// (only while our lease holds), append the attempt, bump endpoint
    /// counters. `None` means the lease was lost and nothing was written.
    pub async fn record_attempt(
        &self,
        record: &AttemptRecord,
    ) -> Result<Option<WebhookDeliveryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("record_webhook_attempt");
        let mut tx = self.pool.begin().await?;

        let attempt = &record.attempt;
        let transition = &record.transition;

        let updated = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = $3,
                attempts = $4,
                max_attempts = $5,
                next_retry_at = $6,
                completed_at = $7,
                response_status = $8,
                response_body = $9,
                error_message = $10,
                error_type = $11,
                first_attempt_at = COALESCE(first_attempt_at, $12),
                last_attempt_at = $12,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE delivery_id = $1
              AND status = 'processing'
              AND lease_token = $2
              AND attempts = $4 - 1
            RETURNING *
            "#,
        )
        .bind(record.delivery_id)
        .bind(record.lease_token)
        .bind(transition.status.as_str())
        .bind(transition.attempts)
        .bind(transition.max_attempts)
        .bind(transition.next_retry_at)
        .bind(transition.completed_at)
        .bind(attempt.response_status)
        .bind(&attempt.response_body)
        .bind(&attempt.error_message)
        .bind(attempt.error_type.map(|e| e.as_str()))
        .bind(attempt.attempted_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entity) = updated else {
            tx.rollback().await?;
            timer.record();
            return Ok(None);
        };

        WebhookAttemptRepository::insert(&mut *tx, attempt).await?;
        WebhookEndpointRepository::record_attempt_counters(
            &mut *tx,
            record.endpoint_id,
            attempt.success,
            attempt.attempted_at,
        )
        .await?;

        tx.commit().await?;
        timer.record();
        Ok(Some(entity))
    }
}
