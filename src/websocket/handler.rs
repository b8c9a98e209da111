//! WebSocket Handler
//!
//! Upgrades the HTTP request to a raw socket and streams broker events to
//! the client as JSON text frames.
//!
//! Each connection runs two tasks:
//! - a read loop that decodes client frames, forwards ping payloads to be
//!   answered and cancels the connection on close, EOF or protocol error
//! - the main loop that owns the write half and selects over cancellation,
//!   broker events, pong requests and the heartbeat ticker

use axum::{
    extract::{Path, Query, Request, State},
    response::Response,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use super::frame::{
    read_frame, write_frame, Frame, Opcode, Role, CLOSE_GOING_AWAY, CLOSE_NORMAL,
    CLOSE_PROTOCOL_ERROR, CLOSE_TRY_AGAIN_LATER,
};
use super::handshake;
use crate::api::dto::ResumeQuery;
use crate::api::{ApiError, ApiResult, AppState, StreamSettings};
use crate::lookup::is_valid_topic_key;
use crate::stream::Subscription;

/// GET /ws/topics/:topic
///
/// Validates the topic and handshake, answers `101 Switching Protocols`,
/// then serves the upgraded connection on a spawned task.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<ResumeQuery>,
    mut request: Request,
) -> ApiResult<Response> {
    if !is_valid_topic_key(&topic) {
        return Err(ApiError::Validation(format!("Invalid topic key: {:?}", topic)));
    }
    state.lookup.ensure_exists(&topic).await?;

    let accept = handshake::validate(request.headers())?;

    let on_upgrade = request
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(|| ApiError::Internal("Connection does not support upgrades".into()))?;

    let broker = state.broker.clone();
    let settings = state.streaming.clone();
    let last_event_id = params.resume_point();

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let subscription = broker.subscribe(&topic, last_event_id.as_deref());
                tracing::info!(
                    topic = %topic,
                    subscription_id = subscription.id(),
                    replay = subscription.pending_replay(),
                    "WebSocket client connected"
                );
                serve_socket(TokioIo::new(upgraded), subscription, settings).await;
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "WebSocket upgrade failed");
            }
        }
    });

    Ok(handshake::switching_protocols(&accept))
}

/// Why the main loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientGone,
    StreamComplete,
    BrokerClosed,
    Evicted,
    WriteFailed,
}

/// Drive one established WebSocket connection until it ends.
///
/// The subscription is released on every exit path.
pub async fn serve_socket<S>(socket: S, mut subscription: Subscription, settings: StreamSettings)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(socket);
    let conn = CancellationToken::new();
    let (pong_tx, mut pong_rx) = mpsc::channel::<Vec<u8>>(8);

    let read_task = tokio::spawn(read_loop(
        BufReader::new(reader),
        conn.clone(),
        pong_tx,
        settings.max_frame_size,
    ));

    let period = settings.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    let exit = loop {
        tokio::select! {
            _ = conn.cancelled() => {
                let _ = write_frame(&mut writer, &Frame::close(CLOSE_NORMAL)).await;
                break Exit::ClientGone;
            }
            maybe = subscription.recv() => {
                let Some(event) = maybe else {
                    let (code, exit) = if subscription.is_broker_stopped() {
                        (CLOSE_GOING_AWAY, Exit::BrokerClosed)
                    } else {
                        (CLOSE_TRY_AGAIN_LATER, Exit::Evicted)
                    };
                    let _ = write_frame(&mut writer, &Frame::close(code)).await;
                    break exit;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(event_id = %event.id, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &Frame::text(text)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break Exit::WriteFailed;
                }
                if settings.close_on_terminal && event.kind.is_terminal() {
                    let _ = write_frame(&mut writer, &Frame::close(CLOSE_NORMAL)).await;
                    break Exit::StreamComplete;
                }
            }
            Some(payload) = pong_rx.recv() => {
                if write_frame(&mut writer, &Frame::pong(payload)).await.is_err() {
                    break Exit::WriteFailed;
                }
            }
            _ = heartbeat.tick() => {
                if write_frame(&mut writer, &Frame::ping()).await.is_err() {
                    break Exit::WriteFailed;
                }
            }
        }
    };

    conn.cancel();
    read_task.abort();
    subscription.cancel();

    tracing::info!(
        topic = %subscription.topic_key(),
        subscription_id = subscription.id(),
        reason = ?exit,
        "WebSocket client disconnected"
    );
}

/// Decode client frames until close, EOF or a protocol error.
///
/// Cancels `conn` on the way out, whatever the reason.
async fn read_loop<R>(
    mut reader: R,
    conn: CancellationToken,
    pongs: mpsc::Sender<Vec<u8>>,
    max_frame_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let _guard = conn.clone().drop_guard();

    loop {
        let result = tokio::select! {
            _ = conn.cancelled() => return,
            result = read_frame(&mut reader, Role::Server, max_frame_size) => result,
        };

        match result {
            Ok(frame) => match frame.opcode {
                Opcode::Close => {
                    tracing::debug!(code = ?frame.close_code(), "Client sent close");
                    return;
                }
                Opcode::Ping => {
                    if pongs.send(frame.payload).await.is_err() {
                        return;
                    }
                }
                Opcode::Pong => {}
                // Clients have nothing to say on this channel
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    tracing::trace!(len = frame.payload.len(), "Ignoring client data frame");
                }
            },
            Err(e) if e.is_disconnect() => {
                tracing::debug!("Client went away");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, close_code = CLOSE_PROTOCOL_ERROR, "WebSocket read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BackpressurePolicy, Broker, BrokerConfig, Payload};
    use crate::websocket::frame::encode;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const KEY: [u8; 4] = [1, 2, 3, 4];
    const LIMIT: usize = 64 * 1024;

    async fn next_frame(client: &mut DuplexStream) -> Frame {
        read_frame(client, Role::Client, LIMIT).await.unwrap()
    }

    async fn next_event(client: &mut DuplexStream) -> serde_json::Value {
        let frame = next_frame(client).await;
        assert_eq!(frame.opcode, Opcode::Text);
        serde_json::from_slice(&frame.payload).unwrap()
    }

    #[tokio::test]
    async fn test_replay_ping_and_close() {
        let broker = Broker::new(BrokerConfig::default());
        broker.publish("t", Payload::status("queued")).unwrap();
        broker.publish("t", Payload::token("hi")).unwrap();

        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);
        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        let first = next_event(&mut client).await;
        assert_eq!(first["id"], "1");
        assert_eq!(first["type"], "status");
        assert_eq!(first["data"]["phase"], "queued");
        assert_eq!(next_event(&mut client).await["id"], "2");

        broker.publish("t", Payload::progress(10)).unwrap();
        assert_eq!(next_event(&mut client).await["id"], "3");

        client
            .write_all(&encode(&Frame::new(Opcode::Ping, b"abc".to_vec()), Some(KEY)))
            .await
            .unwrap();
        let pong = next_frame(&mut client).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"abc");

        client
            .write_all(&encode(&Frame::close(CLOSE_NORMAL), Some(KEY)))
            .await
            .unwrap();
        let close = next_frame(&mut client).await;
        assert_eq!(close.opcode, Opcode::Close);

        task.await.unwrap();
        assert_eq!(broker.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_terminal_event_closes_connection() {
        let broker = Broker::new(BrokerConfig::default());
        broker.publish("t", Payload::token("a")).unwrap();
        broker.publish("t", Payload::final_report("r-1")).unwrap();

        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", Some("1"));
        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        let event = next_event(&mut client).await;
        assert_eq!(event["id"], "2");
        assert_eq!(event["type"], "final");

        let close = next_frame(&mut client).await;
        assert_eq!(close.close_code(), Some(CLOSE_NORMAL));

        task.await.unwrap();
        assert_eq!(broker.stats().subscribers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ping() {
        let broker = Broker::new(BrokerConfig::default());
        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);
        let settings = StreamSettings {
            heartbeat_interval: Duration::from_secs(20),
            ..Default::default()
        };
        let _task = tokio::spawn(serve_socket(server, subscription, settings));

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.opcode, Opcode::Ping);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_client_hangup_releases_subscription() {
        let broker = Broker::new(BrokerConfig::default());
        let (client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);
        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        drop(client);
        task.await.unwrap();
        assert_eq!(broker.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_unmasked_client_frame_ends_connection() {
        let broker = Broker::new(BrokerConfig::default());
        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);
        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        client.write_all(&encode(&Frame::text("x"), None)).await.unwrap();

        let close = next_frame(&mut client).await;
        assert_eq!(close.opcode, Opcode::Close);
        task.await.unwrap();
        assert_eq!(broker.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_broker_stop_sends_going_away() {
        let broker = Broker::new(BrokerConfig::default());
        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);
        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        broker.stop();

        let close = next_frame(&mut client).await;
        assert_eq!(close.close_code(), Some(CLOSE_GOING_AWAY));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_evicted_subscriber_is_told_to_retry() {
        let broker = Broker::new(BrokerConfig {
            channel_capacity: 1,
            backpressure: BackpressurePolicy::Disconnect,
            ..Default::default()
        });
        let (mut client, server) = tokio::io::duplex(LIMIT);
        let subscription = broker.subscribe("t", None);

        // The second event finds the channel full before the connection runs
        broker.publish("t", Payload::token("a")).unwrap();
        broker.publish("t", Payload::token("b")).unwrap();
        assert_eq!(broker.stats().subscribers, 0);

        let task = tokio::spawn(serve_socket(server, subscription, StreamSettings::default()));

        assert_eq!(next_event(&mut client).await["id"], "1");
        let close = next_frame(&mut client).await;
        assert_eq!(close.close_code(), Some(CLOSE_TRY_AGAIN_LATER));
        task.await.unwrap();
    }
}
