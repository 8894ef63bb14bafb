//! Webhook dispatcher.
//!
//! Turns domain events into deliveries and drives each delivery through its
//! state machine: claim, sign, send, classify, record. Attempt failures are
//! never surfaced to the event emitter; they are recorded and either
//! rescheduled or dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use domain::models::{
    Delivery, DeliveryStatus, DomainEvent, EnqueuedDelivery, Endpoint, Lease, NewAttempt,
    NewDelivery, TestSendResponse,
};
use domain::services::{
    classify, plan_transition, AttemptRecord, RetryPolicy, StoreError, Verdict, WebhookStore,
};
use shared::crypto::{idempotency_key, sha256_hex};
use shared::signing::{sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};

use super::transport::{OutboundRequest, TransportOutcome, WebhookTransport};
use crate::config::WebhooksConfig;
use crate::error::ApiError;
use crate::middleware::metrics::{
    record_delivery_created, record_delivery_dead_lettered, record_scheduler_claimed,
    record_webhook_attempt,
};

/// Reason stored on deliveries cancelled because their endpoint went away.
pub const ENDPOINT_INACTIVE: &str = "endpoint inactive";

pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Id";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::DeliveryNotFound => ApiError::NotFound("Delivery not found".to_string()),
            DispatchError::EndpointNotFound => ApiError::NotFound("Endpoint not found".to_string()),
            DispatchError::Conflict(msg) => ApiError::Conflict(msg),
            DispatchError::Serialization(e) => ApiError::Internal(e.to_string()),
            DispatchError::Store(e) => e.into(),
        }
    }
}

/// Dispatcher tuning, resolved from the `webhooks` config section.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub retry: RetryPolicy,
    pub lease: chrono::Duration,
    pub batch_size: i64,
    pub worker_concurrency: usize,
    pub stored_body_limit: usize,
    pub immediate_dispatch: bool,
    pub user_agent: String,
}

impl From<&WebhooksConfig> for DispatcherSettings {
    fn from(cfg: &WebhooksConfig) -> Self {
        Self {
            retry: cfg.retry_policy(),
            lease: cfg.lease_duration(),
            batch_size: cfg.scheduler_batch_size,
            worker_concurrency: cfg.worker_concurrency,
            stored_body_limit: cfg.stored_body_limit_bytes,
            immediate_dispatch: cfg.immediate_dispatch,
            user_agent: cfg.user_agent.clone(),
        }
    }
}

/// Tally of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub released: u64,
    pub claimed: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub dead_lettered: usize,
    /// Ended as `failed` because the endpoint was inactive or deleted.
    pub cancelled: usize,
    /// Left in `processing` because too little lease remained to attempt.
    pub deferred: usize,
    pub errors: usize,
}

impl DispatchSummary {
    fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Success => self.succeeded += 1,
            DeliveryStatus::Pending => self.retrying += 1,
            DeliveryStatus::DeadLetter => self.dead_lettered += 1,
            DeliveryStatus::Failed => self.cancelled += 1,
            DeliveryStatus::Processing => self.deferred += 1,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn WebhookStore>,
    transport: Arc<dyn WebhookTransport>,
    settings: Arc<DispatcherSettings>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        transport: Arc<dyn WebhookTransport>,
        settings: DispatcherSettings,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(settings.worker_concurrency.max(1)));
        Self {
            store,
            transport,
            settings: Arc::new(settings),
            workers,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Entry point for collaborators. Enqueues the event and, when immediate
    /// dispatch is on, attempts new deliveries in the background.
    pub async fn emit(&self, event: DomainEvent) -> Result<Vec<EnqueuedDelivery>, DispatchError> {
        let enqueued = self.enqueue(&event).await?;

        if self.settings.immediate_dispatch {
            for delivery in enqueued.iter().filter(|d| d.created) {
                let this = self.clone();
                let delivery_id = delivery.delivery_id;
                tokio::spawn(async move {
                    let Ok(_permit) = this.workers.clone().acquire_owned().await else {
                        return;
                    };
                    if let Err(e) = this.attempt(delivery_id).await {
                        warn!(delivery_id = %delivery_id, error = %e, "Immediate dispatch failed");
                    }
                });
            }
        }

        Ok(enqueued)
    }

    /// Creates one delivery per active subscriber. Re-enqueueing the same
    /// event returns the existing deliveries.
    pub async fn enqueue(&self, event: &DomainEvent) -> Result<Vec<EnqueuedDelivery>, DispatchError> {
        let subscribers: Vec<Endpoint> = self
            .store
            .find_active_subscribers(&event.event_type)
            .await?
            .into_iter()
            .filter(|e| e.is_deliverable())
            .collect();

        if subscribers.is_empty() {
            debug!(event_type = %event.event_type, "No subscribers for event");
            return Ok(Vec::new());
        }

        let payload = event.snapshot();
        let payload_hash = sha256_hex(&serde_json::to_vec(&payload)?);

        let mut enqueued = Vec::with_capacity(subscribers.len());
        for endpoint in subscribers {
            let (delivery, created) = self
                .store
                .insert_delivery_if_absent(NewDelivery {
                    delivery_id: Uuid::new_v4(),
                    endpoint_id: endpoint.endpoint_id,
                    event_type: event.event_type.clone(),
                    source_event_id: event.id.clone(),
                    payload: payload.clone(),
                    payload_hash: payload_hash.clone(),
                    idempotency_key: idempotency_key(
                        &event.event_type,
                        &event.id,
                        &endpoint.endpoint_id,
                    ),
                    max_attempts: endpoint.max_attempts(),
                })
                .await?;

            if created {
                record_delivery_created();
            }

            enqueued.push(EnqueuedDelivery {
                delivery_id: delivery.delivery_id,
                endpoint_id: endpoint.endpoint_id,
                created,
            });
        }

        info!(
            event_type = %event.event_type,
            source_event_id = %event.id,
            deliveries = enqueued.len(),
            created = enqueued.iter().filter(|d| d.created).count(),
            "Event enqueued"
        );

        Ok(enqueued)
    }

    /// Claims and attempts one delivery. `None` when the delivery is not
    /// pending and due, or another worker holds it.
    pub async fn attempt(&self, delivery_id: Uuid) -> Result<Option<Delivery>, DispatchError> {
        let now = Utc::now();
        let lease = Lease::new(now, self.settings.lease);

        match self.store.claim_delivery(delivery_id, lease, now).await? {
            Some(delivery) => Ok(Some(self.run_claimed(delivery, lease).await?)),
            None => {
                debug!(delivery_id = %delivery_id, "Delivery not claimable, skipping");
                Ok(None)
            }
        }
    }

    /// Operator override: attempt now, whatever the schedule. The attempt
    /// counter is kept; an exhausted delivery gets exactly one more attempt.
    pub async fn retry_now(&self, delivery_id: Uuid) -> Result<Delivery, DispatchError> {
        let lease = Lease::new(Utc::now(), self.settings.lease);
        let delivery = self
            .store
            .claim_for_manual_retry(delivery_id, lease)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => DispatchError::DeliveryNotFound,
                StoreError::Conflict(msg) => DispatchError::Conflict(msg),
                other => other.into(),
            })?;

        info!(
            delivery_id = %delivery_id,
            attempts = delivery.attempts,
            max_attempts = delivery.max_attempts,
            "Manual retry requested"
        );

        self.run_claimed(delivery, lease).await
    }

    /// One-off signed call to an endpoint. Nothing is persisted.
    pub async fn send_test(&self, endpoint_id: Uuid) -> Result<TestSendResponse, DispatchError> {
        let endpoint = self
            .store
            .find_endpoint(endpoint_id)
            .await?
            .ok_or(DispatchError::EndpointNotFound)?;

        let event = DomainEvent::test_ping(endpoint_id);
        let body = serde_json::to_vec(&event.snapshot())?;
        let headers = self.signed_headers(
            &endpoint,
            Uuid::new_v4(),
            &event.event_type,
            1,
            &body,
            Utc::now().timestamp(),
        );

        let outcome = self
            .transport
            .send(OutboundRequest {
                url: endpoint.url.clone(),
                headers,
                body,
                timeout: endpoint_timeout(&endpoint),
            })
            .await;
        let verdict = classify(outcome.status, outcome.failure.as_ref().map(|f| f.kind));

        info!(
            endpoint_id = %endpoint_id,
            success = verdict.is_success(),
            status = ?outcome.status,
            "Test webhook sent"
        );

        Ok(TestSendResponse {
            endpoint_id,
            success: verdict.is_success(),
            response_status: outcome.status.map(i32::from),
            error_message: describe_failure(verdict, &outcome),
            response_body: truncate_body(outcome.body, self.settings.stored_body_limit),
            response_time_ms: outcome.elapsed.as_millis() as i64,
            error_type: verdict.error_type(),
        })
    }

    /// One scheduler pass: reclaim expired leases, then claim due deliveries
    /// and attempt them with bounded concurrency.
    ///
    /// Claims are taken in chunks no larger than the worker pool, each under
    /// a lease that starts when the chunk is claimed, so queued deliveries do
    /// not burn their lease waiting for a worker. Only deliveries due at the
    /// start of the pass are claimed, at most `batch_size` in total.
    pub async fn dispatch_due(&self) -> Result<DispatchSummary, DispatchError> {
        let cutoff = Utc::now();
        let released = self.store.release_expired_leases(cutoff).await?;
        if released > 0 {
            warn!(released = released, "Released expired delivery leases");
        }

        let mut summary = DispatchSummary {
            released,
            ..Default::default()
        };

        let chunk_size =
            (self.settings.worker_concurrency.max(1) as i64).min(self.settings.batch_size);
        let mut remaining = self.settings.batch_size;
        let mut tasks = JoinSet::new();

        while remaining > 0 {
            let lease = Lease::new(Utc::now(), self.settings.lease);
            let limit = chunk_size.min(remaining);
            let claimed = self.store.claim_due(lease, cutoff, limit).await?;
            record_scheduler_claimed(claimed.len());
            summary.claimed += claimed.len();
            remaining -= claimed.len() as i64;
            let exhausted = (claimed.len() as i64) < limit;

            for delivery in claimed {
                let Ok(permit) = self.workers.clone().acquire_owned().await else {
                    break;
                };
                let this = self.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let delivery_id = delivery.delivery_id;
                    (delivery_id, this.run_claimed(delivery, lease).await)
                });
            }

            if exhausted {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(delivery))) => summary.record(delivery.status),
                Ok((delivery_id, Err(e))) => {
                    summary.errors += 1;
                    error!(delivery_id = %delivery_id, error = %e, "Delivery attempt not recorded");
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(error = %e, "Delivery worker panicked");
                }
            }
        }

        Ok(summary)
    }

    async fn run_claimed(&self, delivery: Delivery, lease: Lease) -> Result<Delivery, DispatchError> {
        let endpoint = match self.store.find_endpoint(delivery.endpoint_id).await? {
            Some(endpoint) if endpoint.is_active => endpoint,
            _ => {
                warn!(
                    delivery_id = %delivery.delivery_id,
                    endpoint_id = %delivery.endpoint_id,
                    "Endpoint inactive, cancelling delivery"
                );
                return Ok(self
                    .store
                    .cancel_delivery(delivery.delivery_id, lease.token, ENDPOINT_INACTIVE, Utc::now())
                    .await?);
            }
        };

        let timeout = endpoint_timeout(&endpoint);
        if Utc::now() + chrono::Duration::milliseconds(endpoint.timeout_ms as i64)
            >= lease.expires_at
        {
            // Let the lease lapse; the next pass releases and reclaims it.
            warn!(delivery_id = %delivery.delivery_id, "Lease too short to attempt, deferring");
            return Ok(delivery);
        }

        let attempt_number = delivery.next_attempt_number();
        let body = serde_json::to_vec(&delivery.payload)?;
        let headers = self.signed_headers(
            &endpoint,
            delivery.delivery_id,
            &delivery.event_type,
            attempt_number,
            &body,
            Utc::now().timestamp(),
        );

        let outcome = self
            .transport
            .send(OutboundRequest {
                url: endpoint.url.clone(),
                headers: headers.clone(),
                body,
                timeout,
            })
            .await;

        let attempted_at = Utc::now();
        let verdict = classify(outcome.status, outcome.failure.as_ref().map(|f| f.kind));
        let transition = plan_transition(&delivery, verdict, attempted_at, &self.settings.retry);
        let elapsed = outcome.elapsed;

        let attempt = NewAttempt {
            attempt_id: Uuid::new_v4(),
            delivery_id: delivery.delivery_id,
            attempt_number,
            request_url: endpoint.url.clone(),
            request_headers: headers.into_iter().collect(),
            response_status: outcome.status.map(i32::from),
            error_message: describe_failure(verdict, &outcome),
            response_headers: outcome.headers,
            response_body: truncate_body(outcome.body, self.settings.stored_body_limit),
            response_time_ms: elapsed.as_millis() as i64,
            success: verdict.is_success(),
            error_type: verdict.error_type(),
            attempted_at,
        };

        let updated = self
            .store
            .record_attempt(AttemptRecord {
                delivery_id: delivery.delivery_id,
                endpoint_id: endpoint.endpoint_id,
                lease_token: lease.token,
                attempt,
                transition,
            })
            .await?;

        log_attempt(&updated, attempt_number, verdict);
        record_webhook_attempt(
            outcome_label(updated.status),
            verdict.error_type().map(|e| e.as_str()).unwrap_or("none"),
            elapsed,
        );
        if updated.status == DeliveryStatus::DeadLetter {
            record_delivery_dead_lettered();
        }

        Ok(updated)
    }

    /// Static endpoint headers followed by the reserved delivery headers.
    fn signed_headers(
        &self,
        endpoint: &Endpoint,
        delivery_id: Uuid,
        event_type: &str,
        attempt_number: i32,
        body: &[u8],
        timestamp: i64,
    ) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = endpoint
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        headers.extend([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.settings.user_agent.clone()),
            (DELIVERY_ID_HEADER.to_string(), delivery_id.to_string()),
            (EVENT_HEADER.to_string(), event_type.to_string()),
            (ATTEMPT_HEADER.to_string(), attempt_number.to_string()),
            (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
            (
                SIGNATURE_HEADER.to_string(),
                sign(&endpoint.secret, body, timestamp),
            ),
        ]);
        headers
    }
}

fn endpoint_timeout(endpoint: &Endpoint) -> Duration {
    Duration::from_millis(endpoint.timeout_ms.max(1) as u64)
}

fn outcome_label(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Success => "success",
        DeliveryStatus::DeadLetter => "dead_letter",
        _ => "retry",
    }
}

fn log_attempt(delivery: &Delivery, attempt_number: i32, verdict: Verdict) {
    match delivery.status {
        DeliveryStatus::Success => info!(
            delivery_id = %delivery.delivery_id,
            endpoint_id = %delivery.endpoint_id,
            attempt_number = attempt_number,
            status_code = ?delivery.response_status,
            "Webhook delivered"
        ),
        DeliveryStatus::DeadLetter => error!(
            delivery_id = %delivery.delivery_id,
            endpoint_id = %delivery.endpoint_id,
            attempt_number = attempt_number,
            error_type = ?verdict.error_type(),
            error = ?delivery.error_message,
            "Webhook delivery dead-lettered"
        ),
        _ => warn!(
            delivery_id = %delivery.delivery_id,
            endpoint_id = %delivery.endpoint_id,
            attempt_number = attempt_number,
            error_type = ?verdict.error_type(),
            next_retry_at = ?delivery.next_retry_at,
            "Webhook attempt failed, retry scheduled"
        ),
    }
}

/// Human readable failure reason; the status code wins over body problems.
fn describe_failure(verdict: Verdict, outcome: &TransportOutcome) -> Option<String> {
    if verdict.is_success() {
        return None;
    }
    match (outcome.status, &outcome.failure) {
        (Some(code), _) if !(200..300).contains(&code) => Some(format!("HTTP {}", code)),
        (_, Some(failure)) => Some(failure.message.clone()),
        _ => Some("No response received".to_string()),
    }
}

/// Truncates to at most `limit` bytes on a char boundary.
fn truncate_body(body: Option<String>, limit: usize) -> Option<String> {
    body.map(|mut b| {
        if b.len() > limit {
            let mut cut = limit;
            while !b.is_char_boundary(cut) {
                cut -= 1;
            }
            b.truncate(cut);
        }
        b
    })
}
