//! Webhook endpoint handlers.
//!
//! Thin HTTP mapping over [`EndpointRegistry`](crate::services::EndpointRegistry).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use domain::models::{
    CreateEndpointRequest, CreatedEndpointResponse, EndpointResponse, ListEndpointsQuery,
    ListEndpointsResponse, RotatedSecretResponse, TestSendResponse, UpdateEndpointRequest,
};

use crate::app::AppState;
use crate::error::ApiError;

/// Register an endpoint.
///
/// POST /api/v1/endpoints
///
/// The response carries the signing secret; it is never returned again.
pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<(StatusCode, Json<CreatedEndpointResponse>), ApiError> {
    let created = state.registry.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/endpoints
pub async fn list_endpoints(
    State(state): State<AppState>,
    Query(query): Query<ListEndpointsQuery>,
) -> Result<Json<ListEndpointsResponse>, ApiError> {
    let endpoints: Vec<EndpointResponse> = state
        .registry
        .list(query.include_inactive)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    let total = endpoints.len() as i64;

    Ok(Json(ListEndpointsResponse { endpoints, total }))
}

/// GET /api/v1/endpoints/:endpoint_id
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
) -> Result<Json<EndpointResponse>, ApiError> {
    Ok(Json(state.registry.get(endpoint_id).await?.into()))
}

/// Partially update an endpoint.
///
/// PATCH /api/v1/endpoints/:endpoint_id
pub async fn update_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
    Json(request): Json<UpdateEndpointRequest>,
) -> Result<Json<EndpointResponse>, ApiError> {
    Ok(Json(state.registry.update(endpoint_id, request).await?.into()))
}

/// POST /api/v1/endpoints/:endpoint_id/deactivate
pub async fn deactivate_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
) -> Result<Json<EndpointResponse>, ApiError> {
    Ok(Json(state.registry.deactivate(endpoint_id).await?.into()))
}

/// Soft-delete an endpoint. Its deliveries remain queryable.
///
/// DELETE /api/v1/endpoints/:endpoint_id
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(endpoint_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/endpoints/:endpoint_id/rotate-secret
pub async fn rotate_secret(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
) -> Result<Json<RotatedSecretResponse>, ApiError> {
    Ok(Json(state.registry.rotate_secret(endpoint_id).await?))
}

/// Send a synthetic signed event and report the result synchronously.
///
/// POST /api/v1/endpoints/:endpoint_id/test
pub async fn test_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
) -> Result<Json<TestSendResponse>, ApiError> {
    Ok(Json(state.dispatcher.send_test(endpoint_id).await?))
}
