//! WebSocket Opening Handshake
//!
//! Validates the client's upgrade request and computes the
//! `Sec-WebSocket-Accept` value for the 101 response.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key (RFC 6455 section 1.3)
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks
pub const WEBSOCKET_VERSION: &str = "13";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Missing or invalid Upgrade header")]
    NotWebSocket,

    #[error("Connection header does not request an upgrade")]
    MissingConnectionUpgrade,

    #[error("Unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// base64(SHA1(key + GUID))
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Check the upgrade headers and return the accept value for the response
pub fn validate(headers: &HeaderMap) -> Result<String, HandshakeError> {
    let upgrade = header_str(headers, header::UPGRADE).ok_or(HandshakeError::NotWebSocket)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::NotWebSocket);
    }

    // Connection is a token list, e.g. "keep-alive, Upgrade"
    let connection =
        header_str(headers, header::CONNECTION).ok_or(HandshakeError::MissingConnectionUpgrade)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }

    let version = header_str(headers, header::SEC_WEBSOCKET_VERSION).unwrap_or_default();
    if version.trim() != WEBSOCKET_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }

    let key = header_str(headers, header::SEC_WEBSOCKET_KEY)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    Ok(accept_key(key))
}

/// Build the `101 Switching Protocols` response
pub fn switching_protocols(accept: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(value) = HeaderValue::from_str(accept) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }

    response
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
