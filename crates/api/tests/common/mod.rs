//! Common test utilities for integration tests.
//!
//! Everything runs against the in-memory store and a scripted transport, so
//! no database or network is needed.

// Allow dead code in this module - not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use domain::models::{AttemptErrorType, CreateEndpointRequest, DomainEvent};
use domain::services::{RetryPolicy, WebhookStore};
use fake::{faker::company::en::CompanyName, Fake};
use persistence::InMemoryWebhookStore;
use webhook_api::{
    app::{create_app, AppState},
    config::Config,
    services::{
        Dispatcher, DispatcherSettings, EndpointRegistry, OutboundRequest, TransportFailure,
        TransportOutcome, WebhookTransport,
    },
};

/// Transport that replays queued outcomes and records every request.
///
/// Once the script runs out every call gets a `200 OK`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportOutcome>>,
    requests: Mutex<Vec<OutboundRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: TransportOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn respond(&self, status: u16) {
        self.push(status_outcome(status, ""));
    }

    pub fn respond_with_body(&self, status: u16, body: &str) {
        self.push(status_outcome(status, body));
    }

    pub fn fail(&self, kind: AttemptErrorType, message: &str) {
        self.push(TransportOutcome {
            failure: Some(TransportFailure::new(kind, message)),
            elapsed: Duration::from_millis(5),
            ..Default::default()
        });
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> TransportOutcome {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| status_outcome(200, "ok"))
    }
}

pub fn status_outcome(status: u16, body: &str) -> TransportOutcome {
    TransportOutcome {
        status: Some(status),
        headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body: (!body.is_empty()).then(|| body.to_string()),
        failure: None,
        elapsed: Duration::from_millis(12),
    }
}

/// Header value from a recorded request, matched case-insensitively.
pub fn header_value<'a>(request: &'a OutboundRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Dispatcher settings with zero backoff so retries are due immediately.
pub fn test_settings() -> DispatcherSettings {
    DispatcherSettings {
        retry: RetryPolicy::new(0, 0, 0.0),
        lease: chrono::Duration::seconds(120),
        batch_size: 100,
        worker_concurrency: 4,
        stored_body_limit: 4096,
        immediate_dispatch: false,
        user_agent: "storefront-webhooks/test".to_string(),
    }
}

/// Configuration for router tests: memory storage, http URLs allowed and no
/// immediate dispatch.
pub fn test_config() -> Config {
    Config::load_with_overrides(&[
        ("storage.backend", "memory"),
        ("webhooks.allow_insecure_urls", "true"),
        ("webhooks.immediate_dispatch", "false"),
    ])
    .expect("Failed to load test config")
}

/// Store, transport and the services wired over them.
pub struct TestHarness {
    pub store: Arc<InMemoryWebhookStore>,
    pub transport: Arc<ScriptedTransport>,
    pub registry: EndpointRegistry,
    pub dispatcher: Dispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with(ScriptedTransport::new(), test_settings())
    }

    pub fn with(transport: ScriptedTransport, settings: DispatcherSettings) -> Self {
        let store = Arc::new(InMemoryWebhookStore::new());
        let transport = Arc::new(transport);
        let config = test_config();
        let registry = EndpointRegistry::new(
            store.clone() as Arc<dyn WebhookStore>,
            config.webhooks.endpoint_policy(),
        );
        let dispatcher = Dispatcher::new(
            store.clone() as Arc<dyn WebhookStore>,
            transport.clone() as Arc<dyn WebhookTransport>,
            settings,
        );
        Self {
            store,
            transport,
            registry,
            dispatcher,
        }
    }

    /// Registers an endpoint and returns its id and signing secret.
    pub async fn create_endpoint(&self, events: &[&str], max_retries: i32) -> (uuid::Uuid, String) {
        let created = self
            .registry
            .create(endpoint_request(events, max_retries))
            .await
            .expect("Failed to create endpoint");
        (created.endpoint.endpoint_id, created.secret)
    }
}

pub fn endpoint_request(events: &[&str], max_retries: i32) -> CreateEndpointRequest {
    CreateEndpointRequest {
        name: CompanyName().fake(),
        url: "https://fulfilment.example.com/hooks".to_string(),
        events: events.iter().map(|e| e.to_string()).collect(),
        headers: None,
        max_retries: Some(max_retries),
        timeout_ms: Some(5000),
        is_active: true,
    }
}

pub fn order_placed(order_id: &str) -> DomainEvent {
    DomainEvent::new(
        "order.placed",
        order_id,
        serde_json::json!({"order_id": order_id, "total_cents": 4200}),
    )
}

/// Create a test application router over a fresh in-memory store.
pub fn create_test_app(transport: Arc<ScriptedTransport>) -> (Router, AppState) {
    let store: Arc<dyn WebhookStore> = Arc::new(InMemoryWebhookStore::new());
    let state = AppState::new(test_config(), store, transport);
    (create_app(state.clone()), state)
}

/// Build a JSON request.
pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a bodiless request.
pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Helper to parse JSON response body.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}
