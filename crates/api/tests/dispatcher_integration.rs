//! Integration tests for the delivery pipeline: enqueue, claim, sign, send,
//! classify and record, driven through the in-memory store.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{
    endpoint_request, header_value, order_placed, test_settings, ScriptedTransport, TestHarness,
};
use domain::models::{
    AttemptErrorType, DeliveryFilter, DeliveryStatus, DomainEvent, Lease, UpdateEndpointRequest,
};
use domain::services::WebhookStore;
use shared::signing::{verify, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use webhook_api::services::dispatcher::{ATTEMPT_HEADER, DELIVERY_ID_HEADER, ENDPOINT_INACTIVE};
use webhook_api::services::{DispatchError, DispatcherSettings};

// ============================================================================
// Enqueue
// ============================================================================

#[tokio::test]
async fn test_enqueue_creates_one_delivery_per_subscriber() {
    let h = TestHarness::new();
    let (a, _) = h.create_endpoint(&["order.placed"], 3).await;
    let (b, _) = h.create_endpoint(&["order.placed", "order.paid"], 3).await;
    h.create_endpoint(&["customer.created"], 3).await;

    let enqueued = h.dispatcher.enqueue(&order_placed("ord_1")).await.unwrap();

    assert_eq!(enqueued.len(), 2);
    assert!(enqueued.iter().all(|d| d.created));
    let mut endpoints: Vec<_> = enqueued.iter().map(|d| d.endpoint_id).collect();
    endpoints.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(endpoints, expected);

    let delivery = h
        .store
        .find_delivery(enqueued[0].delivery_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 0);
    assert_eq!(delivery.max_attempts, 3);
    assert_eq!(delivery.payload["type"], "order.placed");
    assert_eq!(delivery.payload["data"]["order_id"], "ord_1");
    assert_eq!(delivery.payload_hash.len(), 64);
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_event_and_endpoint() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let event = order_placed("ord_dup");

    let first = h.dispatcher.enqueue(&event).await.unwrap();
    let second = h.dispatcher.enqueue(&event).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(first[0].created);
    assert!(!second[0].created);
    assert_eq!(first[0].delivery_id, second[0].delivery_id);

    let all = h
        .store
        .list_deliveries(&DeliveryFilter {
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_enqueue_skips_inactive_endpoints() {
    let h = TestHarness::new();
    let mut request = endpoint_request(&["order.placed"], 3);
    request.is_active = false;
    h.registry.create(request).await.unwrap();

    let enqueued = h.dispatcher.enqueue(&order_placed("ord_2")).await.unwrap();
    assert!(enqueued.is_empty());
}

#[tokio::test]
async fn test_enqueue_without_subscribers_is_noop() {
    let h = TestHarness::new();
    let enqueued = h
        .dispatcher
        .enqueue(&DomainEvent::new("refund.issued", "ref_1", serde_json::json!({})))
        .await
        .unwrap();
    assert!(enqueued.is_empty());
}

// ============================================================================
// Attempts and state transitions
// ============================================================================

#[tokio::test]
async fn test_successful_delivery_is_signed_and_recorded() {
    let h = TestHarness::new();
    let (endpoint_id, secret) = h.create_endpoint(&["order.placed"], 3).await;
    let enqueued = h.dispatcher.enqueue(&order_placed("ord_ok")).await.unwrap();
    let delivery_id = enqueued[0].delivery_id;

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.succeeded, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.response_status, Some(200));
    assert!(delivery.completed_at.is_some());
    assert!(delivery.next_retry_at.is_none());
    assert!(delivery.lease_token.is_none());

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, "https://fulfilment.example.com/hooks");
    assert_eq!(request.timeout, Duration::from_millis(5000));
    assert_eq!(
        header_value(request, DELIVERY_ID_HEADER),
        Some(delivery_id.to_string().as_str())
    );
    assert_eq!(header_value(request, ATTEMPT_HEADER), Some("1"));
    assert_eq!(header_value(request, "content-type"), Some("application/json"));
    assert_eq!(
        header_value(request, "user-agent"),
        Some("storefront-webhooks/test")
    );

    // The body is the stored snapshot and the signature verifies with the secret.
    let sent: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(sent, delivery.payload);
    let timestamp: i64 = header_value(request, TIMESTAMP_HEADER)
        .unwrap()
        .parse()
        .unwrap();
    let signature = header_value(request, SIGNATURE_HEADER).unwrap();
    assert!(verify(&secret, &request.body, timestamp, signature, Utc::now().timestamp(), 300).is_ok());

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert!(attempts[0].success);
    assert!(attempts[0].error_type.is_none());
    assert_eq!(attempts[0].response_status, Some(200));
    assert_eq!(attempts[0].response_body.as_deref(), Some("ok"));

    let endpoint = h.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.total_deliveries, 1);
    assert_eq!(endpoint.successful_deliveries, 1);
    assert_eq!(endpoint.failed_deliveries, 0);
    assert!(endpoint.last_triggered_at.is_some());
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let h = TestHarness::new();
    let (endpoint_id, _) = h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_retry")).await.unwrap()[0].delivery_id;

    h.transport.respond_with_body(500, "boom");
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.retrying, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.error_type, Some(AttemptErrorType::HttpError));
    assert_eq!(delivery.error_message.as_deref(), Some("HTTP 500"));
    assert!(delivery.next_retry_at.is_some());

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts, 2);

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    let numbers: Vec<i32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].response_body.as_deref(), Some("boom"));
    assert!(attempts[1].success);

    let requests = h.transport.requests();
    assert_eq!(header_value(&requests[0], ATTEMPT_HEADER), Some("1"));
    assert_eq!(header_value(&requests[1], ATTEMPT_HEADER), Some("2"));
    // Both attempts carry the same delivery id and body.
    assert_eq!(requests[0].body, requests[1].body);

    // Counters count attempts, not deliveries.
    let endpoint = h.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.total_deliveries, 2);
    assert_eq!(endpoint.successful_deliveries, 1);
    assert_eq!(endpoint.failed_deliveries, 1);
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 2).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_dead")).await.unwrap()[0].delivery_id;

    h.transport.respond(503);
    h.transport.respond(503);

    h.dispatcher.dispatch_due().await.unwrap();
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.dead_lettered, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.max_attempts, 2);
    assert!(delivery.next_retry_at.is_none());
    assert!(delivery.completed_at.is_some());

    // Terminal deliveries are never claimed again.
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 0);
    assert_eq!(h.transport.request_count(), 2);
}

#[tokio::test]
async fn test_connection_error_then_503_then_success() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_flaky")).await.unwrap()[0].delivery_id;

    h.transport
        .fail(AttemptErrorType::ConnectionError, "Connection failed: reset");
    h.transport.respond(503);
    h.transport.respond(200);

    for _ in 0..3 {
        h.dispatcher.dispatch_due().await.unwrap();
    }

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(delivery.max_attempts, 3);
    assert_eq!(delivery.response_status, Some(200));

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    let numbers: Vec<i32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let outcomes: Vec<bool> = attempts.iter().map(|a| a.success).collect();
    assert_eq!(outcomes, vec![false, false, true]);
    assert_eq!(attempts[0].error_type, Some(AttemptErrorType::ConnectionError));
    assert!(attempts[0].response_status.is_none());
    assert_eq!(attempts[1].error_type, Some(AttemptErrorType::HttpError));
    assert_eq!(attempts[1].response_status, Some(503));
    assert!(attempts[2].error_type.is_none());
}

#[tokio::test]
async fn test_connection_error_then_503_twice_dead_letters() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_down")).await.unwrap()[0].delivery_id;

    h.transport
        .fail(AttemptErrorType::ConnectionError, "Connection failed: reset");
    h.transport.respond(503);
    h.transport.respond(503);

    for _ in 0..3 {
        h.dispatcher.dispatch_due().await.unwrap();
    }

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(delivery.attempts, delivery.max_attempts);
    assert_eq!(delivery.error_type, Some(AttemptErrorType::HttpError));
    assert!(delivery.next_retry_at.is_none());

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| !a.success));

    // Nothing left to claim.
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 0);
}

#[tokio::test]
async fn test_repeated_server_errors_back_off_until_dead_letter() {
    let mut settings = test_settings();
    settings.retry = domain::services::RetryPolicy {
        base_delay: chrono::Duration::milliseconds(200),
        max_delay: chrono::Duration::seconds(10),
        jitter_ratio: 0.0,
    };
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 4).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_5xx")).await.unwrap()[0].delivery_id;

    let mut schedule = Vec::new();
    for _ in 0..4 {
        h.transport.respond(502);
    }
    for _ in 0..3 {
        let summary = h.dispatcher.dispatch_due().await.unwrap();
        assert_eq!(summary.retrying, 1);

        let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        let next = delivery.next_retry_at.unwrap();
        schedule.push(next);

        // Not due before its time.
        assert_eq!(h.dispatcher.dispatch_due().await.unwrap().claimed, 0);
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait + Duration::from_millis(20)).await;
    }

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.dead_lettered, 1);

    // Delays double: 200ms, 400ms, 800ms.
    assert!(schedule[1] - schedule[0] >= chrono::Duration::milliseconds(400));
    assert!(schedule[2] - schedule[1] >= chrono::Duration::milliseconds(800));

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 4);
    assert_eq!(delivery.attempts, delivery.max_attempts);
    assert!(delivery.next_retry_at.is_none());
    assert_eq!(h.transport.request_count(), 4);
}

#[tokio::test]
async fn test_client_error_dead_letters_immediately() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 5).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_400")).await.unwrap()[0].delivery_id;

    h.transport.respond_with_body(422, "unknown sku");
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.dead_lettered, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.max_attempts, 1);
    assert_eq!(delivery.response_status, Some(422));
    assert_eq!(delivery.error_type, Some(AttemptErrorType::HttpError));
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_429")).await.unwrap()[0].delivery_id;

    h.transport.respond(429);
    h.dispatcher.dispatch_due().await.unwrap();

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.max_attempts, 3);
}

#[tokio::test]
async fn test_zero_retries_still_attempts_once() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 0).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_zero")).await.unwrap()[0].delivery_id;

    h.transport
        .fail(AttemptErrorType::ConnectionError, "Connection failed: refused");
    h.dispatcher.dispatch_due().await.unwrap();

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::DeadLetter);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.max_attempts, 1);
    assert_eq!(delivery.error_type, Some(AttemptErrorType::ConnectionError));
    assert_eq!(
        delivery.error_message.as_deref(),
        Some("Connection failed: refused")
    );
    assert!(delivery.response_status.is_none());
}

#[tokio::test]
async fn test_timeout_schedules_backoff() {
    let mut settings = test_settings();
    settings.retry = domain::services::RetryPolicy::new(30, 3600, 0.0);
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_slow")).await.unwrap()[0].delivery_id;

    h.transport
        .fail(AttemptErrorType::Timeout, "Request timed out after 5000ms");
    let before = Utc::now();
    h.dispatcher.dispatch_due().await.unwrap();

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.error_type, Some(AttemptErrorType::Timeout));
    let next = delivery.next_retry_at.unwrap();
    assert!(next >= before + chrono::Duration::seconds(30));
    assert!(next <= Utc::now() + chrono::Duration::seconds(31));

    // Not due yet.
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 0);
}

#[tokio::test]
async fn test_oversized_response_body_is_truncated() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_big")).await.unwrap()[0].delivery_id;

    h.transport.respond_with_body(200, &"é".repeat(3000));
    h.dispatcher.dispatch_due().await.unwrap();

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    let stored = attempts[0].response_body.as_ref().unwrap();
    assert!(stored.len() <= 4096);
    assert_eq!(stored.len(), 4096);
}

#[tokio::test]
async fn test_static_headers_are_sent_before_reserved_headers() {
    let h = TestHarness::new();
    let mut request = endpoint_request(&["order.placed"], 3);
    request.headers = Some(
        [("X-Tenant".to_string(), "acme".to_string())]
            .into_iter()
            .collect(),
    );
    h.registry.create(request).await.unwrap();
    h.dispatcher.enqueue(&order_placed("ord_hdr")).await.unwrap();
    h.dispatcher.dispatch_due().await.unwrap();

    let sent = &h.transport.requests()[0];
    assert_eq!(header_value(sent, "X-Tenant"), Some("acme"));
    assert_eq!(sent.headers[0].0, "X-Tenant");
}

// ============================================================================
// Endpoint lifecycle during delivery
// ============================================================================

#[tokio::test]
async fn test_deactivated_endpoint_fails_pending_delivery() {
    let h = TestHarness::new();
    let (endpoint_id, _) = h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_off")).await.unwrap()[0].delivery_id;

    h.registry.deactivate(endpoint_id).await.unwrap();
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.cancelled, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.error_message.as_deref(), Some(ENDPOINT_INACTIVE));
    assert_eq!(delivery.attempts, 0);
    assert!(h.store.list_attempts(delivery_id).await.unwrap().is_empty());
    assert_eq!(h.transport.request_count(), 0);
}

#[tokio::test]
async fn test_deleted_endpoint_keeps_history() {
    let h = TestHarness::new();
    let (endpoint_id, _) = h.create_endpoint(&["order.placed"], 3).await;
    let first = h.dispatcher.enqueue(&order_placed("ord_a")).await.unwrap()[0].delivery_id;
    h.dispatcher.dispatch_due().await.unwrap();
    let second = h.dispatcher.enqueue(&order_placed("ord_b")).await.unwrap()[0].delivery_id;

    h.registry.delete(endpoint_id).await.unwrap();
    h.dispatcher.dispatch_due().await.unwrap();

    let delivered = h.store.find_delivery(first).await.unwrap().unwrap();
    assert_eq!(delivered.status, DeliveryStatus::Success);
    assert_eq!(h.store.list_attempts(first).await.unwrap().len(), 1);

    let cancelled = h.store.find_delivery(second).await.unwrap().unwrap();
    assert_eq!(cancelled.status, DeliveryStatus::Failed);
    assert_eq!(h.transport.request_count(), 1);
}

#[tokio::test]
async fn test_rotated_secret_signs_next_attempt() {
    let h = TestHarness::new();
    let (endpoint_id, old_secret) = h.create_endpoint(&["order.placed"], 3).await;
    h.dispatcher.enqueue(&order_placed("ord_rot")).await.unwrap();

    h.transport.respond(500);
    h.dispatcher.dispatch_due().await.unwrap();

    let rotated = h.registry.rotate_secret(endpoint_id).await.unwrap();
    assert_ne!(rotated.secret, old_secret);
    h.dispatcher.dispatch_due().await.unwrap();

    let requests = h.transport.requests();
    let second = &requests[1];
    let timestamp: i64 = header_value(second, TIMESTAMP_HEADER).unwrap().parse().unwrap();
    let signature = header_value(second, SIGNATURE_HEADER).unwrap();
    let now = Utc::now().timestamp();
    assert!(verify(&rotated.secret, &second.body, timestamp, signature, now, 300).is_ok());
    assert!(verify(&old_secret, &second.body, timestamp, signature, now, 300).is_err());
}

#[tokio::test]
async fn test_endpoint_update_does_not_change_snapshot() {
    let h = TestHarness::new();
    let (endpoint_id, _) = h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_snap")).await.unwrap()[0].delivery_id;
    let before = h.store.find_delivery(delivery_id).await.unwrap().unwrap();

    h.registry
        .update(
            endpoint_id,
            UpdateEndpointRequest {
                url: Some("https://fulfilment-v2.example.com/hooks".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.dispatcher.dispatch_due().await.unwrap();

    let after = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(after.payload, before.payload);
    assert_eq!(after.payload_hash, before.payload_hash);
    assert_eq!(
        h.transport.requests()[0].url,
        "https://fulfilment-v2.example.com/hooks"
    );
}

// ============================================================================
// Manual retry
// ============================================================================

#[tokio::test]
async fn test_retry_now_revives_dead_letter() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 1).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_manual")).await.unwrap()[0].delivery_id;

    h.transport.respond(500);
    h.dispatcher.dispatch_due().await.unwrap();
    let dead = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(dead.status, DeliveryStatus::DeadLetter);

    let retried = h.dispatcher.retry_now(delivery_id).await.unwrap();
    assert_eq!(retried.status, DeliveryStatus::Success);
    assert_eq!(retried.attempts, 2);
    assert_eq!(retried.max_attempts, 2);

    let attempts = h.store.list_attempts(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].attempt_number, 2);
}

#[tokio::test]
async fn test_retry_now_failure_dead_letters_again() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 1).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_manual2")).await.unwrap()[0].delivery_id;

    h.transport.respond(500);
    h.transport.respond(500);
    h.dispatcher.dispatch_due().await.unwrap();

    let retried = h.dispatcher.retry_now(delivery_id).await.unwrap();
    assert_eq!(retried.status, DeliveryStatus::DeadLetter);
    assert_eq!(retried.attempts, retried.max_attempts);
}

#[tokio::test]
async fn test_retry_now_pending_attempts_immediately() {
    let mut settings = test_settings();
    settings.retry = domain::services::RetryPolicy::new(3600, 3600, 0.0);
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 5).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_wait")).await.unwrap()[0].delivery_id;

    h.transport.respond(502);
    h.dispatcher.dispatch_due().await.unwrap();

    let retried = h.dispatcher.retry_now(delivery_id).await.unwrap();
    assert_eq!(retried.status, DeliveryStatus::Success);
    assert_eq!(retried.max_attempts, 5);
}

#[tokio::test]
async fn test_retry_now_conflicts_and_not_found() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_done")).await.unwrap()[0].delivery_id;
    h.dispatcher.dispatch_due().await.unwrap();

    let err = h.dispatcher.retry_now(delivery_id).await.unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    let err = h.dispatcher.retry_now(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DispatchError::DeliveryNotFound));
}

// ============================================================================
// Scheduling and leases
// ============================================================================

#[tokio::test]
async fn test_concurrent_passes_attempt_once() {
    let h = TestHarness::with(
        ScriptedTransport::with_delay(Duration::from_millis(100)),
        test_settings(),
    );
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_race")).await.unwrap()[0].delivery_id;

    let (a, b) = tokio::join!(h.dispatcher.dispatch_due(), h.dispatcher.dispatch_due());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.claimed + b.claimed, 1);
    assert_eq!(h.transport.request_count(), 1);
    assert_eq!(h.store.list_attempts(delivery_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_attempt_skips_claimed_delivery() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_held")).await.unwrap()[0].delivery_id;

    let now = Utc::now();
    let held = h
        .store
        .claim_delivery(delivery_id, Lease::new(now, chrono::Duration::seconds(60)), now)
        .await
        .unwrap();
    assert!(held.is_some());

    assert!(h.dispatcher.attempt(delivery_id).await.unwrap().is_none());
    assert_eq!(h.transport.request_count(), 0);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let h = TestHarness::new();
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_crash")).await.unwrap()[0].delivery_id;

    // A worker that claimed the delivery and died.
    let long_ago = Utc::now() - chrono::Duration::minutes(10);
    h.store
        .claim_delivery(
            delivery_id,
            Lease::new(long_ago, chrono::Duration::seconds(60)),
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.released, 1);
    assert_eq!(summary.succeeded, 1);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts, 1);
}

#[tokio::test]
async fn test_short_lease_defers_attempt() {
    let settings = DispatcherSettings {
        lease: chrono::Duration::seconds(1),
        ..test_settings()
    };
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 3).await;
    let delivery_id = h.dispatcher.enqueue(&order_placed("ord_defer")).await.unwrap()[0].delivery_id;

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.deferred, 1);
    assert_eq!(h.transport.request_count(), 0);

    let delivery = h.store.find_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Processing);
    assert_eq!(delivery.attempts, 0);
}

#[tokio::test]
async fn test_queued_deliveries_get_fresh_leases() {
    // One worker, slow receiver: a single lease for the whole batch would
    // expire before the third delivery got its turn.
    let settings = DispatcherSettings {
        lease: chrono::Duration::milliseconds(1800),
        worker_concurrency: 1,
        batch_size: 3,
        ..test_settings()
    };
    let h = TestHarness::with(
        ScriptedTransport::with_delay(Duration::from_millis(500)),
        settings,
    );
    let mut request = endpoint_request(&["order.placed"], 3);
    request.timeout_ms = Some(1000);
    h.registry.create(request).await.unwrap();
    for i in 0..3 {
        h.dispatcher
            .enqueue(&order_placed(&format!("ord_queue_{}", i)))
            .await
            .unwrap();
    }

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 3);
    assert_eq!(summary.deferred, 0);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(h.transport.request_count(), 3);
}

#[tokio::test]
async fn test_rescheduled_delivery_waits_for_next_pass() {
    let settings = DispatcherSettings {
        worker_concurrency: 1,
        ..test_settings()
    };
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 3).await;
    h.dispatcher.enqueue(&order_placed("ord_once")).await.unwrap();
    h.dispatcher.enqueue(&order_placed("ord_twice")).await.unwrap();

    h.transport.respond(500);
    h.transport.respond(500);
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.retrying, 2);
    assert_eq!(h.transport.request_count(), 2);
}

#[tokio::test]
async fn test_batch_size_limits_claims() {
    let settings = DispatcherSettings {
        batch_size: 2,
        ..test_settings()
    };
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 3).await;
    for i in 0..5 {
        h.dispatcher
            .enqueue(&order_placed(&format!("ord_batch_{}", i)))
            .await
            .unwrap();
    }

    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 2);
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 2);
    let summary = h.dispatcher.dispatch_due().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(h.transport.request_count(), 5);
}

#[tokio::test]
async fn test_emit_dispatches_immediately() {
    let settings = DispatcherSettings {
        immediate_dispatch: true,
        ..test_settings()
    };
    let h = TestHarness::with(ScriptedTransport::new(), settings);
    h.create_endpoint(&["order.placed"], 3).await;

    let enqueued = h.dispatcher.emit(order_placed("ord_now")).await.unwrap();
    let delivery_id = enqueued[0].delivery_id;

    let mut status = DeliveryStatus::Pending;
    for _ in 0..50 {
        status = h.store.find_delivery(delivery_id).await.unwrap().unwrap().status;
        if status == DeliveryStatus::Success {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, DeliveryStatus::Success);
}

// ============================================================================
// Test sends
// ============================================================================

#[tokio::test]
async fn test_send_test_persists_nothing() {
    let h = TestHarness::new();
    let (endpoint_id, secret) = h.create_endpoint(&["order.placed"], 3).await;
    h.registry.deactivate(endpoint_id).await.unwrap();

    h.transport.respond_with_body(204, "");
    let result = h.dispatcher.send_test(endpoint_id).await.unwrap();
    assert!(result.success);
    assert_eq!(result.response_status, Some(204));
    assert!(result.error_type.is_none());

    let sent = &h.transport.requests()[0];
    let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(body["type"], "webhook.test");
    let timestamp: i64 = header_value(sent, TIMESTAMP_HEADER).unwrap().parse().unwrap();
    let signature = header_value(sent, SIGNATURE_HEADER).unwrap();
    assert!(verify(&secret, &sent.body, timestamp, signature, Utc::now().timestamp(), 300).is_ok());

    let deliveries = h
        .store
        .list_deliveries(&DeliveryFilter {
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(deliveries.is_empty());

    let endpoint = h.store.find_endpoint(endpoint_id).await.unwrap().unwrap();
    assert_eq!(endpoint.total_deliveries, 0);
}

#[tokio::test]
async fn test_send_test_reports_failure() {
    let h = TestHarness::new();
    let (endpoint_id, _) = h.create_endpoint(&["order.placed"], 3).await;

    h.transport.respond_with_body(401, "bad signature");
    let result = h.dispatcher.send_test(endpoint_id).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.response_status, Some(401));
    assert_eq!(result.error_type, Some(AttemptErrorType::HttpError));
    assert_eq!(result.error_message.as_deref(), Some("HTTP 401"));
    assert_eq!(result.response_body.as_deref(), Some("bad signature"));
}

#[tokio::test]
async fn test_send_test_unknown_endpoint() {
    let h = TestHarness::new();
    let err = h.dispatcher.send_test(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DispatchError::EndpointNotFound));
}
