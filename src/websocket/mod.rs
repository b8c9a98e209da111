//! WebSocket Transport
//!
//! A hand-written RFC 6455 server endpoint that streams one topic's broker
//! events to a client.
//!
//! ## Architecture
//!
//! - **Handshake**: validates the upgrade request and computes the accept key
//! - **Frame**: codec for the binary frame format (masking, extended lengths)
//! - **Handler**: upgrade entry point and per-connection read/write loops
//!
//! ## Usage
//!
//! Clients connect to `/ws/topics/{topic}` and may pass `?last_event_id=N`
//! to resume after event `N`. Every server message is a text frame carrying
//! `{"id": "...", "type": "...", "data": ...}`.
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8090/ws/topics/assessment-42?last_event_id=3');
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   console.log(msg.id, msg.type, msg.data);
//! };
//! ```

pub mod frame;
mod handler;
pub mod handshake;

pub use frame::{Frame, FrameError, Opcode, Role};
pub use handler::{serve_socket, websocket_handler};
pub use handshake::HandshakeError;
