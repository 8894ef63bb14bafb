//! Webhook attempt entity (database row mapping).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::Attempt;
use domain::services::StoreError;

use super::webhook_delivery::parse_error_type;

/// Database row mapping for the webhook_attempts table.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookAttemptEntity {
    pub id: i64,
    pub attempt_id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: Json<HashMap<String, String>>,
    pub response_status: Option<i32>,
    pub response_headers: Json<HashMap<String, String>>,
    pub response_body: Option<String>,
    pub response_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl TryFrom<WebhookAttemptEntity> for Attempt {
    type Error = StoreError;

    fn try_from(entity: WebhookAttemptEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            attempt_id: entity.attempt_id,
            delivery_id: entity.delivery_id,
            attempt_number: entity.attempt_number,
            request_url: entity.request_url,
            request_headers: entity.request_headers.0,
            response_status: entity.response_status,
            response_headers: entity.response_headers.0,
            response_body: entity.response_body,
            response_time_ms: entity.response_time_ms,
            success: entity.success,
            error_message: entity.error_message,
            error_type: parse_error_type(entity.error_type)?,
            attempted_at: entity.attempted_at,
        })
    }
}
