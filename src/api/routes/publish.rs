//! Publish Route
//!
//! - POST /api/v1/topics/:topic/events - Append an event to a topic
//!
//! Producers outside the process use this to feed the broker. Existence is
//! checked the same way the streaming endpoints check it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::PublishRequest;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::lookup::is_valid_topic_key;
use crate::stream::{Event, Payload};

/// POST /api/v1/topics/:topic/events
///
/// Returns 201 with the stored event, including its assigned id.
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    if !is_valid_topic_key(&topic) {
        return Err(ApiError::Validation(format!("Invalid topic key: {:?}", topic)));
    }
    state.lookup.ensure_exists(&topic).await?;

    let event = state
        .broker
        .publish(&topic, Payload::new(req.kind, req.data))?;

    tracing::debug!(topic = %topic, event_id = %event.id, kind = %event.kind, "Event published");

    Ok((StatusCode::CREATED, Json(event)))
}
