//! Delivery and attempt log handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use domain::models::{
    DeliveryFilter, DeliveryResponse, ListAttemptsResponse, ListDeliveriesQuery,
    ListDeliveriesResponse,
};
use shared::pagination::{clamp_limit, Cursor};

use crate::app::AppState;
use crate::error::ApiError;

/// List deliveries, newest first.
///
/// GET /api/v1/deliveries?status=&endpoint_id=&event_type=&cursor=&limit=
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<Json<ListDeliveriesResponse>, ApiError> {
    let limit = clamp_limit(query.limit);
    let before = query.cursor.as_deref().map(Cursor::decode).transpose()?;

    // One extra row tells us whether another page exists.
    let filter = DeliveryFilter {
        status: query.status,
        endpoint_id: query.endpoint_id,
        event_type: query.event_type,
        before,
        limit: limit + 1,
    };
    let mut deliveries = state.store.list_deliveries(&filter).await?;

    let next_cursor = if deliveries.len() as i64 > limit {
        deliveries.truncate(limit as usize);
        deliveries
            .last()
            .map(|d| Cursor::new(d.created_at, d.id).encode())
    } else {
        None
    };

    Ok(Json(ListDeliveriesResponse {
        deliveries: deliveries.into_iter().map(Into::into).collect(),
        next_cursor,
    }))
}

/// GET /api/v1/deliveries/:delivery_id
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let delivery = state
        .store
        .find_delivery(delivery_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Delivery not found".to_string()))?;
    Ok(Json(delivery.into()))
}

/// Attempt history, ordered by attempt number.
///
/// GET /api/v1/deliveries/:delivery_id/attempts
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<ListAttemptsResponse>, ApiError> {
    if state.store.find_delivery(delivery_id).await?.is_none() {
        return Err(ApiError::NotFound("Delivery not found".to_string()));
    }

    let attempts = state.store.list_attempts(delivery_id).await?;
    Ok(Json(ListAttemptsResponse {
        delivery_id,
        attempts: attempts.into_iter().map(Into::into).collect(),
    }))
}

/// Attempt a delivery right away. Rejected with 409 once it has succeeded
/// or while another worker holds it.
///
/// POST /api/v1/deliveries/:delivery_id/retry
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let delivery = state.dispatcher.retry_now(delivery_id).await?;
    Ok(Json(delivery.into()))
}
