use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use domain::services::WebhookStore;

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{deliveries, endpoints, events, health};
use crate::services::{
    Dispatcher, DispatcherSettings, EndpointRegistry, WebhookTransport,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WebhookStore>,
    pub registry: EndpointRegistry,
    pub dispatcher: Dispatcher,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the registry and dispatcher over one store and transport.
    pub fn new(
        config: Config,
        store: Arc<dyn WebhookStore>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        let registry = EndpointRegistry::new(store.clone(), config.webhooks.endpoint_policy());
        let dispatcher = Dispatcher::new(
            store.clone(),
            transport,
            DispatcherSettings::from(&config.webhooks),
        );
        Self {
            store,
            registry,
            dispatcher,
            config: Arc::new(config),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    let endpoint_routes = Router::new()
        .route(
            "/api/v1/endpoints",
            post(endpoints::create_endpoint).get(endpoints::list_endpoints),
        )
        .route(
            "/api/v1/endpoints/:endpoint_id",
            get(endpoints::get_endpoint)
                .patch(endpoints::update_endpoint)
                .delete(endpoints::delete_endpoint),
        )
        .route(
            "/api/v1/endpoints/:endpoint_id/deactivate",
            post(endpoints::deactivate_endpoint),
        )
        .route(
            "/api/v1/endpoints/:endpoint_id/rotate-secret",
            post(endpoints::rotate_secret),
        )
        .route(
            "/api/v1/endpoints/:endpoint_id/test",
            post(endpoints::test_endpoint),
        );

    let delivery_routes = Router::new()
        .route("/api/v1/deliveries", get(deliveries::list_deliveries))
        .route(
            "/api/v1/deliveries/:delivery_id",
            get(deliveries::get_delivery),
        )
        .route(
            "/api/v1/deliveries/:delivery_id/attempts",
            get(deliveries::list_attempts),
        )
        .route(
            "/api/v1/deliveries/:delivery_id/retry",
            post(deliveries::retry_delivery),
        );

    let event_routes = Router::new().route("/api/v1/events", post(events::emit_event));

    Router::new()
        .merge(public_routes)
        .merge(endpoint_routes)
        .merge(delivery_routes)
        .merge(event_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .with_state(state)
}
