//! Source RCON packet codec.
//!
//! Every packet on the TCP stream is:
//!
//!   `<size: i32 LE><id: i32 LE><type: i32 LE><body bytes>\0\0`
//!
//! where `size` counts everything after itself (id + type + body + two NULs).
//! [`RconFramer`] is fed arbitrary chunks from the socket and yields whole
//! packets once they are available.
use bytes::{Buf, BufMut, BytesMut};

/// Largest body the server sends in one response packet; longer output is split.
pub const MAX_BODY: usize = 4096;

/// id + type + two terminating NULs.
const HEADER_AND_PADDING: usize = 10;

/// Upper bound for a declared packet size before the stream is treated as corrupt.
const MAX_PACKET_SIZE: usize = 4096 + HEADER_AND_PADDING + 1024;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server answers with when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = body.len() + HEADER_AND_PADDING;
        let mut buf = BytesMut::with_capacity(size + 4);
        buf.put_i32_le(size as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_slice(body);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared size outside `10..=MAX_PACKET_SIZE`.
    BadSize(i32),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::BadSize(n) => write!(f, "invalid packet size {}", n),
        }
    }
}

impl std::error::Error for FrameError {}

/// Incremental RCON packet framer.
pub struct RconFramer {
    buf: BytesMut,
}

impl Default for RconFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl RconFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_BODY + 64),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete packet. `Ok(None)` means more bytes are needed.
    /// A corrupt size is an error: the stream cannot be resynchronised.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let declared = i32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if declared < HEADER_AND_PADDING as i32 || declared as usize > MAX_PACKET_SIZE {
            return Err(FrameError::BadSize(declared));
        }
        let size = declared as usize;
        if self.buf.len() < 4 + size {
            return Ok(None);
        }
        self.buf.advance(4);
        let mut frame = self.buf.split_to(size);
        let id = frame.get_i32_le();
        let kind = frame.get_i32_le();
        // Body is everything up to the first NUL of the terminator.
        let body_bytes = &frame[..frame.len().saturating_sub(2)];
        let end = body_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(body_bytes.len());
        let body = String::from_utf8_lossy(&body_bytes[..end]).into_owned();
        Ok(Some(Packet { id, kind, body }))
    }
}
