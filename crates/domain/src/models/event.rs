//! Domain events emitted by collaborating modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// One occurrence of something that happened elsewhere in the system
/// (an order was placed, a customer was created, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    /// Identifier assigned by the emitting module; stable across re-emits.
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// The body delivered to receivers, frozen at enqueue time.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "created_at": self.occurred_at,
            "data": self.payload,
        })
    }

    /// Synthetic event used by test sends.
    pub fn test_ping(endpoint_id: Uuid) -> Self {
        Self::new(
            "webhook.test",
            format!("test_{}", Uuid::new_v4()),
            serde_json::json!({
                "endpoint_id": endpoint_id,
                "message": "This is a test webhook delivery",
            }),
        )
    }
}

/// Request payload for emitting an event over HTTP.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmitEventRequest {
    #[validate(custom(function = "validate_event_type"))]
    pub event_type: String,

    #[validate(length(min = 1, max = 255, message = "Source event id must be 1-255 characters"))]
    pub source_event_id: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub occurred_at: Option<DateTime<Utc>>,
}

fn validate_event_type(event_type: &str) -> Result<(), validator::ValidationError> {
    shared::validation::validate_event_type(event_type)
}

impl From<EmitEventRequest> for DomainEvent {
    fn from(req: EmitEventRequest) -> Self {
        Self {
            id: req.source_event_id,
            event_type: req.event_type,
            payload: req.payload,
            occurred_at: req.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

/// One delivery resolved for an emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedDelivery {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    /// False when the delivery already existed for this (event, endpoint).
    pub created: bool,
}

/// Response for an emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitEventResponse {
    pub event_type: String,
    pub source_event_id: String,
    pub deliveries: Vec<EnqueuedDelivery>,
}
