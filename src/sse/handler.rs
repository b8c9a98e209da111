//! SSE Handler
//!
//! Streams one topic's events as `text/event-stream`, with a comment line
//! every heartbeat period to keep intermediaries from timing out.

use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event as SseEvent, Sse},
        IntoResponse,
    },
};
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};

use crate::api::dto::ResumeQuery;
use crate::api::{ApiError, ApiResult, AppState, StreamSettings};
use crate::lookup::is_valid_topic_key;
use crate::stream::{Event, Subscription};

/// Standard SSE resume header sent by `EventSource` on reconnect
pub const LAST_EVENT_ID: &str = "last-event-id";

/// GET /api/v1/topics/:topic/events
///
/// The resume point is the `Last-Event-ID` header, overridden by a
/// non-empty `last_event_id` query parameter.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<ResumeQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    if !is_valid_topic_key(&topic) {
        return Err(ApiError::Validation(format!("Invalid topic key: {:?}", topic)));
    }
    state.lookup.ensure_exists(&topic).await?;

    let last_event_id = params.resume_point().or_else(|| {
        headers
            .get(LAST_EVENT_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    });

    let subscription = state.broker.subscribe(&topic, last_event_id.as_deref());
    tracing::info!(
        topic = %topic,
        subscription_id = subscription.id(),
        replay = subscription.pending_replay(),
        "SSE client connected"
    );

    let headers = [
        (header::CACHE_CONTROL, "no-store"),
        (header::CONNECTION, "keep-alive"),
    ];
    Ok((headers, Sse::new(event_stream(subscription, state.streaming.clone()))))
}

enum Tick {
    Event(Arc<Event>),
    Heartbeat,
}

/// Turn a subscription into SSE frames.
///
/// Ends when the subscription closes or, with `close_on_terminal`, right
/// after a `final` or `error` event. Dropping the stream (client gone)
/// drops the subscription, which releases it.
pub fn event_stream(
    mut subscription: Subscription,
    settings: StreamSettings,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream! {
        let period = settings.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            let tick = tokio::select! {
                maybe = subscription.recv() => match maybe {
                    Some(event) => Tick::Event(event),
                    None => break,
                },
                _ = heartbeat.tick() => Tick::Heartbeat,
            };

            match tick {
                Tick::Heartbeat => {
                    yield Ok(SseEvent::default().comment("ping"));
                }
                Tick::Event(event) => {
                    match event.to_json() {
                        Ok(json) => {
                            yield Ok(SseEvent::default().id(event.id.clone()).data(json));
                        }
                        Err(e) => {
                            tracing::error!(event_id = %event.id, error = %e, "Failed to encode event");
                        }
                    }
                    if settings.close_on_terminal && event.kind.is_terminal() {
                        break;
                    }
                }
            }
        }

        subscription.cancel();
        tracing::info!(
            topic = %subscription.topic_key(),
            subscription_id = subscription.id(),
            "SSE stream ended"
        );
    }
}
