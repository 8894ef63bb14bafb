//! In-memory [`WebhookStore`] for development mode and tests.
//!
//! Mirrors the PostgreSQL semantics: every trait method runs under one lock,
//! so claims are exclusive and attempt writes are all-or-nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use domain::models::{
    Attempt, Delivery, DeliveryFilter, DeliveryStatus, Endpoint, EndpointChanges, Lease,
    NewDelivery, NewEndpoint,
};
use domain::services::{manual_retry_conflict, AttemptRecord, StoreError, WebhookStore};

#[derive(Default)]
struct Inner {
    next_endpoint_id: i64,
    next_delivery_id: i64,
    next_attempt_id: i64,
    endpoints: HashMap<Uuid, Endpoint>,
    deliveries: HashMap<Uuid, Delivery>,
    idempotency_keys: HashMap<String, Uuid>,
    attempts: HashMap<Uuid, Vec<Attempt>>,
}

impl Inner {
    fn live_endpoint_mut(&mut self, endpoint_id: Uuid) -> Option<&mut Endpoint> {
        self.endpoints
            .get_mut(&endpoint_id)
            .filter(|e| e.deleted_at.is_none())
    }

    fn claim(delivery: &mut Delivery, lease: &Lease) {
        delivery.status = DeliveryStatus::Processing;
        delivery.lease_token = Some(lease.token);
        delivery.lease_expires_at = Some(lease.expires_at);
        delivery.updated_at = Utc::now();
    }
}

fn holds_lease(delivery: &Delivery, token: Uuid) -> bool {
    delivery.status == DeliveryStatus::Processing && delivery.lease_token == Some(token)
}

/// Webhook store held entirely in process memory.
#[derive(Default)]
pub struct InMemoryWebhookStore {
    inner: Mutex<Inner>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_endpoint(&self, endpoint: NewEndpoint) -> Result<Endpoint, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.endpoints.contains_key(&endpoint.endpoint_id) {
            return Err(StoreError::Conflict("Endpoint id already exists".to_string()));
        }
        inner.next_endpoint_id += 1;
        let now = Utc::now();
        let stored = Endpoint {
            id: inner.next_endpoint_id,
            endpoint_id: endpoint.endpoint_id,
            name: endpoint.name,
            url: endpoint.url,
            secret: endpoint.secret,
            events: endpoint.events,
            is_active: endpoint.is_active,
            headers: endpoint.headers,
            max_retries: endpoint.max_retries,
            timeout_ms: endpoint.timeout_ms,
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        inner.endpoints.insert(stored.endpoint_id, stored.clone());
        Ok(stored)
    }

    async fn find_endpoint(&self, endpoint_id: Uuid) -> Result<Option<Endpoint>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_endpoint_mut(endpoint_id).map(|e| e.clone()))
    }

    async fn list_endpoints(&self, include_inactive: bool) -> Result<Vec<Endpoint>, StoreError> {
        let inner = self.inner.lock().await;
        let mut endpoints: Vec<Endpoint> = inner
            .endpoints
            .values()
            .filter(|e| e.deleted_at.is_none() && (include_inactive || e.is_active))
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| (e.created_at, e.id));
        Ok(endpoints)
    }

    async fn update_endpoint(
        &self,
        endpoint_id: Uuid,
        changes: EndpointChanges,
    ) -> Result<Option<Endpoint>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(endpoint) = inner.live_endpoint_mut(endpoint_id) else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            endpoint.name = name;
        }
        if let Some(url) = changes.url {
            endpoint.url = url;
        }
        if let Some(events) = changes.events {
            endpoint.events = events;
        }
        if let Some(headers) = changes.headers {
            endpoint.headers = headers;
        }
        if let Some(max_retries) = changes.max_retries {
            endpoint.max_retries = max_retries;
        }
        if let Some(timeout_ms) = changes.timeout_ms {
            endpoint.timeout_ms = timeout_ms;
        }
        if let Some(is_active) = changes.is_active {
            endpoint.is_active = is_active;
        }
        endpoint.updated_at = Utc::now();
        Ok(Some(endpoint.clone()))
    }

    async fn set_endpoint_secret(
        &self,
        endpoint_id: Uuid,
        secret: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.live_endpoint_mut(endpoint_id) {
            Some(endpoint) => {
                endpoint.secret = secret.to_string();
                endpoint.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn soft_delete_endpoint(&self, endpoint_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.live_endpoint_mut(endpoint_id) {
            Some(endpoint) => {
                let now = Utc::now();
                endpoint.deleted_at = Some(now);
                endpoint.is_active = false;
                endpoint.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn find_active_subscribers(&self, event_type: &str) -> Result<Vec<Endpoint>, StoreError> {
        let inner = self.inner.lock().await;
        let mut endpoints: Vec<Endpoint> = inner
            .endpoints
            .values()
            .filter(|e| e.is_deliverable() && e.subscribes_to(event_type))
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.id);
        Ok(endpoints)
    }

    async fn insert_delivery_if_absent(
        &self,
        delivery: NewDelivery,
    ) -> Result<(Delivery, bool), StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .idempotency_keys
            .get(&delivery.idempotency_key)
            .and_then(|id| inner.deliveries.get(id))
        {
            return Ok((existing.clone(), false));
        }

        inner.next_delivery_id += 1;
        let now = Utc::now();
        let stored = Delivery {
            id: inner.next_delivery_id,
            delivery_id: delivery.delivery_id,
            endpoint_id: delivery.endpoint_id,
            event_type: delivery.event_type,
            source_event_id: delivery.source_event_id,
            payload: delivery.payload,
            payload_hash: delivery.payload_hash,
            idempotency_key: delivery.idempotency_key,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: delivery.max_attempts,
            next_retry_at: None,
            response_status: None,
            response_body: None,
            error_message: None,
            error_type: None,
            first_attempt_at: None,
            last_attempt_at: None,
            completed_at: None,
            lease_token: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        inner
            .idempotency_keys
            .insert(stored.idempotency_key.clone(), stored.delivery_id);
        inner.deliveries.insert(stored.delivery_id, stored.clone());
        Ok((stored, true))
    }

    async fn find_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.deliveries.get(&delivery_id).cloned())
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, StoreError> {
        let inner = self.inner.lock().await;
        let mut deliveries: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        deliveries.truncate(filter.limit.max(0) as usize);
        Ok(deliveries)
    }

    async fn claim_delivery(
        &self,
        delivery_id: Uuid,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.deliveries.get_mut(&delivery_id) {
            Some(delivery) if delivery.is_due(now) => {
                Inner::claim(delivery, &lease);
                Some(delivery.clone())
            }
            _ => None,
        })
    }

    async fn claim_for_manual_retry(
        &self,
        delivery_id: Uuid,
        lease: Lease,
    ) -> Result<Delivery, StoreError> {
        let mut inner = self.inner.lock().await;
        let delivery = inner
            .deliveries
            .get_mut(&delivery_id)
            .ok_or(StoreError::NotFound)?;

        if let Some(reason) = manual_retry_conflict(delivery.status) {
            return Err(StoreError::Conflict(reason));
        }

        Inner::claim(delivery, &lease);
        delivery.next_retry_at = None;
        delivery.completed_at = None;
        delivery.max_attempts = delivery.max_attempts.max(delivery.attempts + 1);
        Ok(delivery.clone())
    }

    async fn claim_due(
        &self,
        lease: Lease,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut due: Vec<(DateTime<Utc>, i64, Uuid)> = inner
            .deliveries
            .values()
            .filter(|d| d.is_due(now))
            .map(|d| (d.next_retry_at.unwrap_or(d.created_at), d.id, d.delivery_id))
            .collect();
        due.sort();
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, delivery_id) in due {
            if let Some(delivery) = inner.deliveries.get_mut(&delivery_id) {
                Inner::claim(delivery, &lease);
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for delivery in inner.deliveries.values_mut() {
            let expired = delivery.status == DeliveryStatus::Processing
                && delivery.lease_expires_at.map_or(false, |t| t < now);
            if expired {
                delivery.status = DeliveryStatus::Pending;
                delivery.lease_token = None;
                delivery.lease_expires_at = None;
                delivery.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn cancel_delivery(
        &self,
        delivery_id: Uuid,
        lease_token: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, StoreError> {
        let mut inner = self.inner.lock().await;
        let delivery = inner
            .deliveries
            .get_mut(&delivery_id)
            .filter(|d| holds_lease(d, lease_token))
            .ok_or(StoreError::LeaseLost(delivery_id))?;

        delivery.status = DeliveryStatus::Failed;
        delivery.error_message = Some(reason.to_string());
        delivery.completed_at = Some(now);
        delivery.next_retry_at = None;
        delivery.lease_token = None;
        delivery.lease_expires_at = None;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    async fn record_attempt(&self, record: AttemptRecord) -> Result<Delivery, StoreError> {
        let mut inner = self.inner.lock().await;
        let transition = record.transition;
        let attempt = record.attempt;

        {
            let delivery = inner
                .deliveries
                .get(&record.delivery_id)
                .filter(|d| {
                    holds_lease(d, record.lease_token) && d.attempts == transition.attempts - 1
                })
                .ok_or(StoreError::LeaseLost(record.delivery_id))?;
            debug_assert_eq!(delivery.attempts + 1, attempt.attempt_number);
        }

        inner.next_attempt_id += 1;
        let stored_attempt = Attempt {
            id: inner.next_attempt_id,
            attempt_id: attempt.attempt_id,
            delivery_id: attempt.delivery_id,
            attempt_number: attempt.attempt_number,
            request_url: attempt.request_url,
            request_headers: attempt.request_headers,
            response_status: attempt.response_status,
            response_headers: attempt.response_headers,
            response_body: attempt.response_body.clone(),
            response_time_ms: attempt.response_time_ms,
            success: attempt.success,
            error_message: attempt.error_message.clone(),
            error_type: attempt.error_type,
            attempted_at: attempt.attempted_at,
        };
        inner
            .attempts
            .entry(record.delivery_id)
            .or_default()
            .push(stored_attempt);

        if let Some(endpoint) = inner.endpoints.get_mut(&record.endpoint_id) {
            endpoint.total_deliveries += 1;
            if attempt.success {
                endpoint.successful_deliveries += 1;
            } else {
                endpoint.failed_deliveries += 1;
            }
            endpoint.last_triggered_at = Some(attempt.attempted_at);
        }

        let delivery = inner
            .deliveries
            .get_mut(&record.delivery_id)
            .ok_or(StoreError::LeaseLost(record.delivery_id))?;
        delivery.status = transition.status;
        delivery.attempts = transition.attempts;
        delivery.max_attempts = transition.max_attempts;
        delivery.next_retry_at = transition.next_retry_at;
        delivery.completed_at = transition.completed_at;
        delivery.response_status = attempt.response_status;
        delivery.response_body = attempt.response_body;
        delivery.error_message = attempt.error_message;
        delivery.error_type = attempt.error_type;
        delivery.first_attempt_at = delivery.first_attempt_at.or(Some(attempt.attempted_at));
        delivery.last_attempt_at = Some(attempt.attempted_at);
        delivery.lease_token = None;
        delivery.lease_expires_at = None;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    async fn count_deliveries_by_status(&self) -> Result<Vec<(DeliveryStatus, i64)>, StoreError> {
        let inner = self.inner.lock().await;
        let mut counts: Vec<(DeliveryStatus, i64)> = Vec::new();
        for delivery in inner.deliveries.values() {
            match counts.iter_mut().find(|(status, _)| *status == delivery.status) {
                Some((_, n)) => *n += 1,
                None => counts.push((delivery.status, 1)),
            }
        }
        Ok(counts)
    }

    async fn list_attempts(&self, delivery_id: Uuid) -> Result<Vec<Attempt>, StoreError> {
        let inner = self.inner.lock().await;
        let mut attempts = inner.attempts.get(&delivery_id).cloned().unwrap_or_default();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}
