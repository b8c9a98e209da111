//! Topic Registry Routes
//!
//! - PUT /api/v1/topics/:topic - Register a topic
//! - DELETE /api/v1/topics/:topic - Unregister a topic
//!
//! Only meaningful in registry mode; in open mode every key already exists
//! and both routes answer 409.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::TopicResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::lookup::{is_valid_topic_key, TopicRegistry};

fn registry(state: &AppState) -> ApiResult<&Arc<TopicRegistry>> {
    state
        .registry
        .as_ref()
        .ok_or_else(|| ApiError::Conflict("Server runs in open lookup mode".into()))
}

/// PUT /api/v1/topics/:topic
///
/// 201 when newly registered, 200 when it already was.
pub async fn register_topic(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> ApiResult<(StatusCode, Json<TopicResponse>)> {
    if !is_valid_topic_key(&topic) {
        return Err(ApiError::Validation(format!("Invalid topic key: {:?}", topic)));
    }

    let created = registry(&state)?.register(&topic).await;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(TopicResponse { topic, created })))
}

/// DELETE /api/v1/topics/:topic
///
/// Live subscribers keep streaming; only new subscriptions are refused.
pub async fn unregister_topic(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> ApiResult<StatusCode> {
    if registry(&state)?.unregister(&topic).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Topic {} is not registered", topic)))
    }
}
