//! Framed codec for orchestrator communication.
//!
//! Every frame, either direction, has the same layout:
//!
//! ```text
//! [2 bytes: length L, little-endian] [1 byte: message type]
//! [36 bytes: correlation id text] [L-37 bytes: body, optional]
//! ```
//!
//! `L` counts the type byte, the correlation id, and the body. The length
//! prefix is pinned little-endian on both ends. Wraps LengthDelimitedCodec
//! for the prefix and parses the fixed header by hand.

use std::io;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Correlation ids are hyphenated UUIDs rendered as UTF-8 text.
pub const CORRELATION_ID_LEN: usize = 36;

/// Largest body that fits a frame given the 16-bit length prefix.
pub const MAX_BODY_LEN: usize = u16::MAX as usize - 1 - CORRELATION_ID_LEN;

/// Message type discriminant carried in the byte after the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Command request (orchestrator → grain) or command response (grain → orchestrator).
    User,
    /// Log notification (grain → orchestrator).
    System,
    Ping,
    Pong,
    /// Command that failed before reaching the handler.
    Error,
    /// Unrecognized discriminant. The dispatcher ignores these; decoding
    /// them instead of failing keeps the connection up.
    Unknown(u8),
}

impl MessageType {
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0 => Self::User,
            1 => Self::System,
            2 => Self::Ping,
            3 => Self::Pong,
            255 => Self::Error,
            other => Self::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::User => 0,
            Self::System => 1,
            Self::Ping => 2,
            Self::Pong => 3,
            Self::Error => 255,
            Self::Unknown(byte) => byte,
        }
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub correlation_id: String,
    pub body: Bytes,
}

impl Frame {
    pub fn new(
        message_type: MessageType,
        correlation_id: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_type,
            correlation_id: correlation_id.into(),
            body: body.into(),
        }
    }

    /// Empty-body frame (PING/PONG replies and bare errors).
    pub fn empty(message_type: MessageType, correlation_id: impl Into<String>) -> Self {
        Self::new(message_type, correlation_id, Bytes::new())
    }
}

/// Codec implementing the frame layout above.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(2)
                .little_endian()
                .max_frame_length(u16::MAX as usize)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut payload) = self.inner.decode(src)? else {
            return Ok(None);
        };

        if payload.len() < 1 + CORRELATION_ID_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload of {} bytes is shorter than the header", payload.len()),
            ));
        }

        let message_type = MessageType::from_wire(payload.split_to(1)[0]);
        let correlation_id = String::from_utf8(payload.split_to(CORRELATION_ID_LEN).to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Some(Frame {
            message_type,
            correlation_id,
            body: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.correlation_id.len() != CORRELATION_ID_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "correlation id must be {} bytes, got {}",
                    CORRELATION_ID_LEN,
                    frame.correlation_id.len()
                ),
            ));
        }
        if frame.body.len() > MAX_BODY_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame body of {} bytes exceeds the 16-bit length prefix", frame.body.len()),
            ));
        }

        let mut payload = BytesMut::with_capacity(1 + CORRELATION_ID_LEN + frame.body.len());
        payload.put_u8(frame.message_type.to_wire());
        payload.put_slice(frame.correlation_id.as_bytes());
        payload.put_slice(&frame.body);

        tracing::trace!(
            message_type = frame.message_type.to_wire(),
            id = %frame.correlation_id,
            body_bytes = frame.body.len(),
            "Encoding frame"
        );
        self.inner.encode(payload.freeze(), dst)
    }
}
