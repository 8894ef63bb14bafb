//! Webhook endpoint domain model.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A registered destination URL subscribed to one or more event types.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Endpoint {
    pub id: i64,
    pub endpoint_id: Uuid,
    pub name: String,
    pub url: String,
    /// Signing secret. Never serialized into API responses.
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub headers: HashMap<String, String>,
    pub max_retries: i32,
    pub timeout_ms: i32,
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("endpoint_id", &self.endpoint_id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("secret", &"[redacted]")
            .field("events", &self.events)
            .field("is_active", &self.is_active)
            .field("max_retries", &self.max_retries)
            .field("timeout_ms", &self.timeout_ms)
            .field("deleted_at", &self.deleted_at)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Soft-deleted endpoints keep their history but are otherwise invisible.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the endpoint may receive traffic right now.
    pub fn is_deliverable(&self) -> bool {
        self.is_active && !self.is_deleted() && !self.events.is_empty()
    }

    /// Whether the endpoint subscribes to the given event type.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == event_type)
    }

    /// Attempt budget snapshotted into each new delivery.
    ///
    /// A delivery always gets at least one attempt, even with `max_retries = 0`.
    pub fn max_attempts(&self) -> i32 {
        self.max_retries.max(1)
    }
}

/// Bounds and defaults applied when endpoints are registered or updated.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    /// Accept plain `http://` URLs (dev/test mode only).
    pub allow_insecure_urls: bool,
    pub default_max_retries: i32,
    pub max_retries_limit: i32,
    pub default_timeout_ms: i32,
    pub min_timeout_ms: i32,
    pub max_timeout_ms: i32,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            allow_insecure_urls: false,
            default_max_retries: 5,
            max_retries_limit: 10,
            default_timeout_ms: 10_000,
            min_timeout_ms: 1_000,
            max_timeout_ms: 30_000,
        }
    }
}

impl EndpointPolicy {
    /// Resolve the retry budget, falling back to the default.
    pub fn resolve_max_retries(&self, requested: Option<i32>) -> Result<i32, String> {
        let value = requested.unwrap_or(self.default_max_retries);
        if (0..=self.max_retries_limit).contains(&value) {
            Ok(value)
        } else {
            Err(format!(
                "max_retries must be between 0 and {}",
                self.max_retries_limit
            ))
        }
    }

    /// Resolve the per-attempt timeout, falling back to the default.
    pub fn resolve_timeout_ms(&self, requested: Option<i32>) -> Result<i32, String> {
        let value = requested.unwrap_or(self.default_timeout_ms);
        if (self.min_timeout_ms..=self.max_timeout_ms).contains(&value) {
            Ok(value)
        } else {
            Err(format!(
                "timeout_ms must be between {} and {}",
                self.min_timeout_ms, self.max_timeout_ms
            ))
        }
    }

    /// Validate a destination URL against the transport security rules.
    pub fn validate_url(&self, url: &str) -> Result<(), String> {
        shared::validation::validate_endpoint_url(url, self.allow_insecure_urls).map_err(|e| {
            e.message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "Invalid URL".to_string())
        })
    }
}

/// Default active status for new endpoints.
fn default_active() -> bool {
    true
}

/// Request payload for registering an endpoint.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateEndpointRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(
        url(message = "Invalid URL format"),
        length(min = 1, max = 2048, message = "URL must be 1-2048 characters")
    )]
    pub url: String,

    #[validate(custom(function = "validate_events"))]
    pub events: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_headers"))]
    pub headers: Option<HashMap<String, String>>,

    pub max_retries: Option<i32>,

    pub timeout_ms: Option<i32>,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Request payload for updating an endpoint (partial update).
///
/// The signing secret is deliberately absent; it only changes through rotation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct UpdateEndpointRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(
        url(message = "Invalid URL format"),
        length(min = 1, max = 2048, message = "URL must be 1-2048 characters")
    )]
    pub url: Option<String>,

    #[validate(custom(function = "validate_events"))]
    pub events: Option<Vec<String>>,

    #[validate(custom(function = "validate_headers"))]
    pub headers: Option<HashMap<String, String>>,

    pub max_retries: Option<i32>,

    pub timeout_ms: Option<i32>,

    pub is_active: Option<bool>,
}

fn validate_events(events: &[String]) -> Result<(), validator::ValidationError> {
    shared::validation::validate_event_types(events)
}

fn validate_headers(headers: &HashMap<String, String>) -> Result<(), validator::ValidationError> {
    shared::validation::validate_static_headers(headers)
}

/// Validated field changes handed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub headers: Option<HashMap<String, String>>,
    pub max_retries: Option<i32>,
    pub timeout_ms: Option<i32>,
    pub is_active: Option<bool>,
}

/// A fully validated endpoint ready to be inserted.
#[derive(Clone)]
pub struct NewEndpoint {
    pub endpoint_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub headers: HashMap<String, String>,
    pub max_retries: i32,
    pub timeout_ms: i32,
}

/// Response payload for endpoint operations. Never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EndpointResponse {
    pub endpoint_id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub headers: HashMap<String, String>,
    pub max_retries: i32,
    pub timeout_ms: i32,
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Endpoint> for EndpointResponse {
    fn from(e: Endpoint) -> Self {
        Self {
            endpoint_id: e.endpoint_id,
            name: e.name,
            url: e.url,
            events: e.events,
            is_active: e.is_active,
            headers: e.headers,
            max_retries: e.max_retries,
            timeout_ms: e.timeout_ms,
            total_deliveries: e.total_deliveries,
            successful_deliveries: e.successful_deliveries,
            failed_deliveries: e.failed_deliveries,
            last_triggered_at: e.last_triggered_at,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// Response for endpoint creation: the only time the secret is revealed.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedEndpointResponse {
    #[serde(flatten)]
    pub endpoint: EndpointResponse,
    pub secret: String,
}

/// Response for secret rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedSecretResponse {
    pub endpoint_id: Uuid,
    pub secret: String,
}

/// Response for listing endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ListEndpointsResponse {
    pub endpoints: Vec<EndpointResponse>,
    pub total: i64,
}

/// Query parameters for listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEndpointsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}
