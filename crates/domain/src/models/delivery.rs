//! Webhook delivery domain model.
//!
//! A delivery is one obligation to deliver one event occurrence to one
//! endpoint, tracked through retries to a terminal outcome.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attempt::AttemptErrorType;

/// Delivery lifecycle status.
///
/// `pending → processing → {success | pending (retry) | dead_letter}`.
/// `failed` marks a delivery cancelled because its endpoint went away or was
/// deactivated before the attempt ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Success,
    Failed,
    DeadLetter,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Processing,
        DeliveryStatus::Success,
        DeliveryStatus::Failed,
        DeliveryStatus::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::DeadLetter => "dead_letter",
        }
    }

    /// States the dispatcher never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::DeadLetter)
    }

    /// States an operator may manually retry from.
    pub fn is_manually_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Pending | DeliveryStatus::Failed | DeliveryStatus::DeadLetter
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "processing" => Ok(DeliveryStatus::Processing),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            "dead_letter" => Ok(DeliveryStatus::DeadLetter),
            other => Err(format!("Unknown delivery status: {}", other)),
        }
    }
}

/// Represents a delivery in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Delivery {
    pub id: i64,
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub source_event_id: String,
    /// Immutable snapshot of the event taken at enqueue time.
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub idempotency_key: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<AttemptErrorType>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Pending and either never attempted or past its retry time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Pending && self.next_retry_at.map_or(true, |t| t <= now)
    }

    /// Number the next attempt will carry.
    pub fn next_attempt_number(&self) -> i32 {
        self.attempts + 1
    }
}

/// A delivery ready to be inserted (if its idempotency key is new).
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub source_event_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub idempotency_key: String,
    pub max_attempts: i32,
}

/// Exclusive claim on a delivery held by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(now: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            expires_at: now + duration,
        }
    }
}

/// Listing filter for deliveries, newest first.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub endpoint_id: Option<Uuid>,
    pub event_type: Option<String>,
    /// Only rows strictly older than this position.
    pub before: Option<shared::pagination::Cursor>,
    pub limit: i64,
}

impl DeliveryFilter {
    /// In-process equivalent of the SQL WHERE clause.
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.status.map_or(true, |s| delivery.status == s)
            && self.endpoint_id.map_or(true, |e| delivery.endpoint_id == e)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| delivery.event_type == t)
            && self.before.map_or(true, |c| {
                (delivery.created_at, delivery.id) < (c.created_at, c.id)
            })
    }
}

/// Query parameters for listing deliveries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDeliveriesQuery {
    pub status: Option<DeliveryStatus>,
    pub endpoint_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Response payload for a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryResponse {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub source_event_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<AttemptErrorType>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(d: Delivery) -> Self {
        Self {
            delivery_id: d.delivery_id,
            endpoint_id: d.endpoint_id,
            event_type: d.event_type,
            source_event_id: d.source_event_id,
            payload: d.payload,
            payload_hash: d.payload_hash,
            status: d.status,
            attempts: d.attempts,
            max_attempts: d.max_attempts,
            next_retry_at: d.next_retry_at,
            response_status: d.response_status,
            response_body: d.response_body,
            error_message: d.error_message,
            error_type: d.error_type,
            first_attempt_at: d.first_attempt_at,
            last_attempt_at: d.last_attempt_at,
            completed_at: d.completed_at,
            created_at: d.created_at,
        }
    }
}

/// Response for listing deliveries.
#[derive(Debug, Clone, Serialize)]
pub struct ListDeliveriesResponse {
    pub deliveries: Vec<DeliveryResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
