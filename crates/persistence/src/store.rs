//! PostgreSQL-backed [`WebhookStore`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use domain::models::{
    Attempt, Delivery, DeliveryFilter, DeliveryStatus, Endpoint, EndpointChanges, Lease,
    NewDelivery, NewEndpoint,
};
use domain::services::{manual_retry_conflict, AttemptRecord, StoreError, WebhookStore};

use crate::repositories::{
    WebhookAttemptRepository, WebhookDeliveryRepository, WebhookEndpointRepository,
};

/// Webhook store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
    endpoints: WebhookEndpointRepository,
    deliveries: WebhookDeliveryRepository,
    attempts: WebhookAttemptRepository,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            endpoints: WebhookEndpointRepository::new(pool.clone()),
            deliveries: WebhookDeliveryRepository::new(pool.clone()),
            attempts: WebhookAttemptRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_deliveries(
    entities: Vec<crate::entities::WebhookDeliveryEntity>,
) -> Result<Vec<Delivery>, StoreError> {
    entities.into_iter().map(Delivery::try_from).collect()
}

#[async_trait::async_trait]
impl WebhookStore for PgWebhookStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_endpoint(&self, endpoint: NewEndpoint) -> Result<Endpoint, StoreError> {
        Ok(self.endpoints.create(&endpoint).await?.into())
    }

    async fn find_endpoint(&self, endpoint_id: Uuid) -> Result<Option<Endpoint>, StoreError> {
        Ok(self
            .endpoints
            .find_by_endpoint_id(endpoint_id)
            .await?
            .map(Into::into))
    }

    async fn list_endpoints(&self, include_inactive: bool) -> Result<Vec<Endpoint>, StoreError> {
        Ok(self
            .endpoints
            .list(include_inactive)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn update_endpoint(
        &self,
        endpoint_id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StoreError> {
        Ok(self
            .endpoints
            .update(endpoint_id, &changes)
            .await?
            .map(Into::into))
    }

    async fn set_endpoint_secret(
        &self,
        endpoint_id: Uuid,
        secret: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.endpoints.set_secret(endpoint_id, secret).await?)
    }

    async fn soft_delete_endpoint(&self, endpoint_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.endpoints.soft_delete(endpoint_id).await?)
    }

    async fn find_active_subscribers(&self, event_type: &str) -> Result<Vec<Endpoint>, StoreError> {
        Ok(self
            .endpoints
            .find_active_subscribers(event_type)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn insert_delivery_if_absent(
        &self,
        delivery: NewDelivery,
    ) -> Result<(Delivery, bool), StoreError> {
        let (entity, created) = self.deliveries.create_if_absent(&delivery).await?;
        Ok((entity.try_into()?, created))
    }

    async fn find_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.deliveries
            .find_by_delivery_id(delivery_id)
            .await?
            .map(Delivery::try_from)
            .transpose()
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError> {
        into_deliveries(self.deliveries.list(filter).await?)
    }

    async fn claim_delivery(
        &self,
        delivery_id: Uuid,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError> {
        self.deliveries
            .claim(delivery_id, &lease, now)
            .await?
            .map(Delivery::try_from)
            .transpose()
    }

    async fn claim_for_manual_retry(
        &self,
        delivery_id: Uuid,
        lease: Lease,
    ) -> Result<Delivery, StoreError> {
        if let Some(entity) = self
            .deliveries
            .claim_for_manual_retry(delivery_id, &lease)
            .await?
        {
            return entity.try_into();
        }

        // Nothing claimed: tell "unknown" apart from "wrong state".
        let current: Delivery = self
            .deliveries
            .find_by_delivery_id(delivery_id)
            .await?
            .ok_or(StoreError::NotFound)?
            .try_into()?;
        Err(StoreError::Conflict(
            manual_retry_conflict(current.status)
                .unwrap_or_else(|| "Delivery changed state concurrently".to_string()),
        ))
    }

    async fn claim_due(
        &self,
        lease: Lease,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        into_deliveries(self.deliveries.claim_due(&lease, now, limit).await?)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.deliveries.release_expired_leases(now).await?)
    }

    async fn cancel_delivery(
        &self,
        delivery_id: Uuid,
        lease_token: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, StoreError> {
        self.deliveries
            .cancel(delivery_id, lease_token, reason, now)
            .await?
            .ok_or(StoreError::LeaseLost(delivery_id))?
            .try_into()
    }

    async fn record_attempt(&self, record: AttemptRecord) -> Result<Delivery, StoreError> {
        self.deliveries
            .record_attempt(&record)
            .await?
            .ok_or(StoreError::LeaseLost(record.delivery_id))?
            .try_into()
    }

    async fn count_deliveries_by_status(&self) -> Result<Vec<(DeliveryStatus, i64)>, StoreError> {
        self.deliveries
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| {
                status
                    .parse::<DeliveryStatus>()
                    .map(|status| (status, count))
                    .map_err(StoreError::Corrupt)
            })
            .collect()
    }

    async fn list_attempts(&self, delivery_id: Uuid) -> Result<Vec<Attempt>, StoreError> {
        self.attempts
            .find_by_delivery_id(delivery_id)
            .await?
            .into_iter()
            .map(Attempt::try_from)
            .collect()
    }
}
