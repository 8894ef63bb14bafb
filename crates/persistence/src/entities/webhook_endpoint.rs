//! Webhook endpoint entity (database row mapping).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::Endpoint;

/// Database row mapping for the webhook_endpoints table.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEndpointEntity {
    pub id: i64,
    pub endpoint_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub headers: Json<HashMap<String, String>>,
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

impl From<WebhookEndpointEntity> for Endpoint {
    fn from(entity: WebhookEndpointEntity) -> Self {
        Self {
            id: entity.id,
            endpoint_id: entity.endpoint_id,
            name: entity.name,
            url: entity.url,
            secret: entity.secret,
            events: entity.events,
            is_active: entity.is_active,
            headers: entity.headers.0,
            max_retries: entity.max_retries,
            timeout_ms: entity.timeout_ms,
            total_deliveries: entity.total_deliveries,
            successful_deliveries: entity.successful_deliveries,
            failed_deliveries: entity.failed_deliveries,
            last_triggered_at: entity.last_triggered_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            deleted_at: entity.deleted_at,
        }
    }
}
