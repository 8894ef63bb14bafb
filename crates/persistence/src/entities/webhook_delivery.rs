//! Webhook delivery entity definitions.
//!
//! Maps to the webhook_deliveries table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{AttemptErrorType, Delivery, DeliveryStatus};
use domain::services::StoreError;

/// Database entity for webhook_deliveries table.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDeliveryEntity {
    pub id: i64,
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub source_event_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub idempotency_key: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parses an optional stored error type column.
pub(crate) fn parse_error_type(raw: Option<String>) -> Result<Option<AttemptErrorType>, StoreError> {
    raw.map(|s| s.parse::<AttemptErrorType>().map_err(StoreError::Corrupt))
        .transpose()
}

impl TryFrom<WebhookDeliveryEntity> for Delivery {
    type Error = StoreError;

    fn try_from(entity: WebhookDeliveryEntity) -> Result<Self, Self::Error> {
        let status = entity
            .status
            .parse::<DeliveryStatus>()
            .map_err(StoreError::Corrupt)?;

        Ok(Self {
            id: entity.id,
            delivery_id: entity.delivery_id,
            endpoint_id: entity.endpoint_id,
            event_type: entity.event_type,
            source_event_id: entity.source_event_id,
            payload: entity.payload,
            payload_hash: entity.payload_hash,
            idempotency_key: entity.idempotency_key,
            status,
            attempts: entity.attempts,
            max_attempts: entity.max_attempts,
            next_retry_at: entity.next_retry_at,
            response_status: entity.response_status,
            response_body: entity.response_body,
            error_message: entity.error_message,
            error_type: parse_error_type(entity.error_type)?,
            first_attempt_at: entity.first_attempt_at,
            last_attempt_at: entity.last_attempt_at,
            completed_at: entity.completed_at,
            lease_token: entity.lease_token,
            lease_expires_at: entity.lease_expires_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
