//! Event ingestion for collaborators running out of process.

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use domain::models::{DomainEvent, EmitEventRequest, EmitEventResponse};

use crate::app::AppState;
use crate::error::ApiError;

/// Accept a domain event and fan it out to subscribed endpoints.
///
/// POST /api/v1/events
///
/// Answers 202 once deliveries are persisted; delivery outcomes are never
/// reported back to the emitter.
pub async fn emit_event(
    State(state): State<AppState>,
    Json(request): Json<EmitEventRequest>,
) -> Result<(StatusCode, Json<EmitEventResponse>), ApiError> {
    request.validate()?;

    let event: DomainEvent = request.into();
    let event_type = event.event_type.clone();
    let source_event_id = event.id.clone();

    let deliveries = state.dispatcher.emit(event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EmitEventResponse {
            event_type,
            source_event_id,
            deliveries,
        }),
    ))
}
