//! Storage contract for the delivery pipeline.
//!
//! The dispatcher and registry only talk to storage through [`WebhookStore`].
//! Implementations must make each method atomic; in particular
//! [`WebhookStore::record_attempt`] appends the attempt, updates the delivery
//! and bumps the endpoint counters as one unit.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Attempt, Delivery, DeliveryFilter, DeliveryStatus, Endpoint, EndpointChanges, Lease,
    NewAttempt, NewDelivery, NewEndpoint,
};
use crate::services::delivery_policy::Transition;

/// Errors surfaced by a [`WebhookStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller's lease expired and the delivery was reclaimed.
    #[error("Lease lost for delivery {0}")]
    LeaseLost(Uuid),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Everything written when an attempt finishes.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub lease_token: Uuid,
    pub attempt: NewAttempt,
    pub transition: Transition,
}

#[async_trait::async_trait]
pub trait WebhookStore: Send + Sync {
    /// Cheap liveness probe of the backing store.
    async fn ping(&self) -> Result<(), StoreError>;

    // ---- endpoints ----

    async fn insert_endpoint(&self, endpoint: NewEndpoint) -> Result<Endpoint, StoreError>;

    /// Finds an endpoint that has not been soft-deleted.
    async fn find_endpoint(&self, endpoint_id: Uuid) -> Result<Option<Endpoint>, StoreError>;

    /// Lists endpoints that have not been soft-deleted, oldest first.
    async fn list_endpoints(&self, include_inactive: bool) -> Result<Vec<Endpoint>, StoreError>;

    async fn update_endpoint(
        &self,
        endpoint_id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StoreError>;

    /// Replaces the signing secret. Returns false if the endpoint is unknown.
    async fn set_endpoint_secret(&self, endpoint_id: Uuid, secret: &str)
        -> Result<bool, StoreError>;

    /// Marks the endpoint deleted and inactive. Deliveries are retained.
    async fn soft_delete_endpoint(&self, endpoint_id: Uuid) -> Result<bool, StoreError>;

    /// Active, non-deleted endpoints subscribed to `event_type`.
    async fn find_active_subscribers(&self, event_type: &str) -> Result<Vec<Endpoint>, StoreError>;

    // ---- deliveries ----

    /// Inserts unless a delivery with the same idempotency key exists.
    ///
    /// Returns the stored delivery and whether this call created it.
    async fn insert_delivery_if_absent(
        &self,
        delivery: NewDelivery,
    ) -> Result<(Delivery, bool), StoreError>;

    async fn find_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>, StoreError>;

    /// Deliveries matching the filter, newest first, at most `filter.limit`.
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError>;

    /// Claims one delivery if it is pending and due. `None` if another worker
    /// holds it or it is not due.
    async fn claim_delivery(
        &self,
        delivery_id: Uuid,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError>;

    /// Claims a delivery for an operator retry regardless of its schedule.
    ///
    /// Fails with `NotFound`, or `Conflict` when it already succeeded or is in
    /// flight. Exhausted deliveries get exactly one more attempt of budget.
    async fn claim_for_manual_retry(
        &self,
        delivery_id: Uuid,
        lease: Lease,
    ) -> Result<Delivery, StoreError>;

    /// Claims up to `limit` due pending deliveries, oldest due first.
    /// Concurrent callers receive disjoint sets.
    async fn claim_due(
        &self,
        lease: Lease,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError>;

    /// Returns processing deliveries with expired leases to pending.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Ends a claimed delivery without an attempt, as `failed`.
    async fn cancel_delivery(
        &self,
        delivery_id: Uuid,
        lease_token: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, StoreError>;

    /// Appends the attempt and applies the transition; fails with
    /// `LeaseLost` (writing nothing) if the lease is no longer held.
    async fn record_attempt(&self, record: AttemptRecord) -> Result<Delivery, StoreError>;

    /// Number of deliveries in each status. Statuses with no deliveries may
    /// be omitted.
    async fn count_deliveries_by_status(&self) -> Result<Vec<(DeliveryStatus, i64)>, StoreError>;

    // ---- attempts ----

    /// Attempts of a delivery ordered by attempt number.
    async fn list_attempts(&self, delivery_id: Uuid) -> Result<Vec<Attempt>, StoreError>;
}

/// Conflict reason for a manual retry of a delivery in `status`.
pub fn manual_retry_conflict(status: DeliveryStatus) -> Option<String> {
    match status {
        DeliveryStatus::Success => Some("Delivery already succeeded".to_string()),
        DeliveryStatus::Processing => Some("Delivery is currently in flight".to_string()),
        _ => None,
    }
}
