//! WebSocket Frame Codec
//!
//! The subset of RFC 6455 framing this server speaks. No extensions, no
//! fragmentation of outgoing messages.
//!
//! Layout:
//! ```text
//! byte 0: FIN (1) | RSV (3) | opcode (4)
//! byte 1: MASK (1) | length (7)      126 => u16 follows, 127 => u64 follows
//! [extended length: 2 or 8 bytes, big-endian]
//! [masking key: 4 bytes, client-to-server only]
//! payload
//! ```

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (server shutdown)
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol error
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Try again later (slow consumer evicted; reconnect with the last id)
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Which side of the connection is reading.
///
/// Servers only accept masked frames; clients only accept unmasked ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// One decoded (unmasked) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn ping() -> Self {
        Self::new(Opcode::Ping, Vec::new())
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    pub fn close(code: u16) -> Self {
        Self::new(Opcode::Close, code.to_be_bytes().to_vec())
    }

    /// Status code carried by a close frame, if any
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_slice()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown opcode: {0:#x}")]
    UnknownOpcode(u8),

    #[error("Frame payload of {len} bytes exceeds limit of {limit}")]
    TooLarge { len: u64, limit: usize },

    #[error("Protocol violation: {0}")]
    Protocol(&'static str),
}

impl FrameError {
    /// True when the peer simply hung up between frames
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// XOR `payload` with the 4-byte masking key, cyclically
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Serialize a frame. Servers pass `None`; clients must pass a key.
pub fn encode(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = frame.payload.len();
    let mut buf = Vec::with_capacity(len + 14);

    let fin = if frame.fin { 0x80 } else { 0x00 };
    buf.push(fin | (frame.opcode as u8 & 0x0F));

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len <= 125 {
        buf.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_bit | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | 127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(&frame.payload),
    }

    buf
}

/// Read exactly one frame.
///
/// Every read is `read_exact`, so short reads from the socket are retried
/// until the header, key and payload are complete.
pub async fn read_frame<R>(reader: &mut R, role: Role, max_payload: usize) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    if header[0] & 0x70 != 0 {
        return Err(FrameError::Protocol("reserved bits set"));
    }
    let opcode = Opcode::from_u8(header[0] & 0x0F)?;
    let masked = header[1] & 0x80 != 0;

    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        short => short as u64,
    };

    match (role, masked) {
        (Role::Server, false) => return Err(FrameError::Protocol("client frame not masked")),
        (Role::Client, true) => return Err(FrameError::Protocol("server frame masked")),
        _ => {}
    }
    if opcode.is_control() && (len > MAX_CONTROL_PAYLOAD || !fin) {
        return Err(FrameError::Protocol("invalid control frame"));
    }
    if len > max_payload as u64 {
        return Err(FrameError::TooLarge {
            len,
            limit: max_payload,
        });
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Write one unmasked (server-to-client) frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(frame, None)).await?;
    writer.flush().await?;
    Ok(())
}
