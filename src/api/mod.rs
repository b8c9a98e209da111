//! Tidings HTTP API
//!
//! HTTP surface for the broker, built with Axum.
//!
//! # Endpoints
//!
//! ## Streaming
//! - `GET /api/v1/topics/:topic/events` - Server-Sent Events stream
//! - `GET /ws/topics/:topic` - WebSocket stream
//!
//! ## Producers
//! - `POST /api/v1/topics/:topic/events` - Publish an event
//!
//! ## Topic registry
//! - `PUT /api/v1/topics/:topic` - Register a topic
//! - `DELETE /api/v1/topics/:topic` - Unregister a topic
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,no_run
//! use tidings::api::{serve, ApiConfig, AppState};
//! use tidings::stream::{Broker, BrokerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(BrokerConfig::default());
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(broker.clone(), config.clone());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState, StreamSettings};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::sse::sse_handler;
use crate::websocket::websocket_handler;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/topics/:topic",
            put(routes::topics::register_topic).delete(routes::topics::unregister_topic),
        )
        .route(
            "/topics/:topic/events",
            get(sse_handler).post(routes::publish::publish_event),
        )
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let ws_routes = Router::new().route("/topics/:topic", get(websocket_handler));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/ws", ws_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the API server.
///
/// On Ctrl-C or SIGTERM the broker is stopped, which ends every open
/// stream so the graceful shutdown can complete.
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let broker = state.broker.clone();
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Tidings listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            broker.stop();
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Tidings shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupError, ResourceLookup, TopicRegistry};
    use crate::stream::{Broker, BrokerConfig, Payload};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Broker) {
        let broker = Broker::new(BrokerConfig::default());
        let state = AppState::new(broker.clone(), ApiConfig::default());
        (build_router(state), broker)
    }

    fn create_registry_app(topics: &[&str]) -> (Router, Broker) {
        let broker = Broker::new(BrokerConfig::default());
        let registry = Arc::new(TopicRegistry::with_topics(topics.iter().copied()));
        let state = AppState::with_registry(broker.clone(), registry, ApiConfig::default());
        (build_router(state), broker)
    }

    struct FailingLookup;

    #[async_trait]
    impl ResourceLookup for FailingLookup {
        async fn ensure_exists(&self, _topic_key: &str) -> Result<(), LookupError> {
            Err(LookupError::Unavailable("connection refused".into()))
        }
    }

    async fn get_uri(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn sse_ids(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| line.strip_prefix("id:"))
            .map(|id| id.trim().to_string())
            .collect()
    }

    fn publish_finished_run(broker: &Broker, topic: &str) {
        broker.publish(topic, Payload::status("generating")).unwrap();
        broker.publish(topic, Payload::token("Hello")).unwrap();
        broker.publish(topic, Payload::final_report("r-1")).unwrap();
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _broker) = create_test_app();
        let response = get_uri(app, "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let (app, broker) = create_test_app();
        assert_eq!(get_uri(app.clone(), "/health/ready").await.status(), StatusCode::OK);

        broker.stop();
        assert_eq!(
            get_uri(app, "/health/ready").await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _broker) = create_test_app();
        let response = get_uri(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["broker"]["topics"], 0);
    }

    #[tokio::test]
    async fn test_sse_streams_history_and_closes_on_final() {
        let (app, broker) = create_test_app();
        publish_finished_run(&broker, "run-1");

        let response = get_uri(app, "/api/v1/topics/run-1/events").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let body = body_string(response).await;
        assert_eq!(sse_ids(&body), vec!["1", "2", "3"]);
        assert!(body.contains(r#""type":"final""#));
        assert!(body.contains(r#""report_id":"r-1""#));
        assert_eq!(broker.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_sse_resumes_from_last_event_id_header() {
        let (app, broker) = create_test_app();
        publish_finished_run(&broker, "run-1");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/topics/run-1/events")
                    .header("Last-Event-ID", "2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(sse_ids(&body_string(response).await), vec!["3"]);
    }

    #[tokio::test]
    async fn test_sse_query_overrides_header() {
        let (app, broker) = create_test_app();
        publish_finished_run(&broker, "run-1");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/topics/run-1/events?last_event_id=1")
                    .header("Last-Event-ID", "2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(sse_ids(&body_string(response).await), vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_sse_invalid_topic_key() {
        let (app, broker) = create_test_app();
        let response = get_uri(app, "/api/v1/topics/bad%20key/events").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broker.stats().topics, 0);
    }

    #[tokio::test]
    async fn test_sse_unknown_topic_in_registry_mode() {
        let (app, broker) = create_registry_app(&["known"]);
        let response = get_uri(app, "/api/v1/topics/unknown/events").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["code"], "TOPIC_NOT_FOUND");
        assert_eq!(broker.stats().topics, 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_internal_error() {
        let broker = Broker::new(BrokerConfig::default());
        let state = AppState::with_lookup(broker.clone(), Arc::new(FailingLookup), ApiConfig::default());
        let app = build_router(state);

        let response = get_uri(app.clone(), "/api/v1/topics/a/events").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = get_uri(app, "/ws/topics/a").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(broker.stats().topics, 0);
    }

    #[tokio::test]
    async fn test_events_route_rejects_other_methods() {
        let (app, _broker) = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/topics/a/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_publish_event() {
        let (app, broker) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/topics/run-1/events")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"type": "token", "data": {"text": "Hi"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["id"], "1");
        assert_eq!(body["type"], "token");
        assert_eq!(body["data"]["text"], "Hi");
        assert_eq!(broker.stats().retained_events, 1);
    }

    #[tokio::test]
    async fn test_publish_invalid_json() {
        let (app, _broker) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/topics/run-1/events")
                    .header("Content-Type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_after_stop() {
        let (app, broker) = create_test_app();
        broker.stop();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/topics/run-1/events")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"type": "status", "data": {"phase": "x"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_topic_registration_lifecycle() {
        let (app, _broker) = create_registry_app(&[]);

        let request = |method: &str, uri: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request("PUT", "/api/v1/topics/run-9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.clone().oneshot(request("PUT", "/api/v1/topics/run-9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["created"], false);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/topics/run-9/events")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"type": "final", "data": {"report_id": "r"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.clone().oneshot(request("DELETE", "/api/v1/topics/run-9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(request("DELETE", "/api/v1/topics/run-9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_registration_conflicts_in_open_mode() {
        let (app, _broker) = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/topics/run-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    fn ws_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ws_rejects_plain_get() {
        let (app, broker) = create_test_app();
        let response = get_uri(app, "/ws/topics/run-1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broker.stats().topics, 0);
    }

    #[tokio::test]
    async fn test_ws_unknown_topic_in_registry_mode() {
        let (app, _broker) = create_registry_app(&[]);
        let response = app.oneshot(ws_request("/ws/topics/run-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_requires_upgradable_connection() {
        // oneshot requests carry no upgrade handle
        let (app, broker) = create_test_app();
        let response = app.oneshot(ws_request("/ws/topics/run-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(broker.stats().topics, 0);
    }
}
