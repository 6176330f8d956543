//! Message Codec
//!
//! Binary framing for protocol messages.
//!
//! # Wire Format
//!
//! ```text
//! +--------+----------------+----------------------+
//! | header | payload length | payload (UTF-8 JSON) |
//! | 1 byte | 4 bytes, BE    | `length` bytes       |
//! +--------+----------------+----------------------+
//! ```
//!
//! The payload is a JSON array of strings for `Sync` and a JSON string for
//! `Error`. A frame must be consumed exactly: trailing bytes are an error.

use crate::domain::message::{ErrorMessage, Message, MessageKind, SyncMessage};

/// Size of the header tag plus the length prefix.
pub const FRAME_PREFIX_LEN: usize = 5;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was empty.
    #[error("empty frame")]
    Empty,

    /// The frame ended before the declared payload.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required by the frame prefix.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Bytes remained after the declared payload.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// The header tag does not name a known variant.
    #[error("unknown message header: {0:#04x}")]
    UnknownHeader(u8),

    /// The payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),

    /// The payload did not match the variant's shape.
    #[error("payload decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes and decodes protocol frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a message into a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or is too large.
    pub fn pack(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let payload = match message {
            Message::Sync(sync) => serde_json::to_vec(sync)?,
            Message::Error(error) => serde_json::to_vec(error)?,
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

        let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
        frame.push(message.header());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a frame into a message.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown headers, length mismatches and payloads
    /// that do not fit the variant.
    pub fn unpack(&self, frame: &[u8]) -> Result<Message, CodecError> {
        let (&header, rest) = frame.split_first().ok_or(CodecError::Empty)?;
        let kind = MessageKind::from_header(header).ok_or(CodecError::UnknownHeader(header))?;

        if rest.len() < 4 {
            return Err(CodecError::Truncated {
                expected: FRAME_PREFIX_LEN,
                actual: frame.len(),
            });
        }
        let (len_bytes, payload) = rest.split_at(4);
        let declared = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);

        if declared > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(declared));
        }
        if payload.len() < declared {
            return Err(CodecError::Truncated {
                expected: FRAME_PREFIX_LEN + declared,
                actual: frame.len(),
            });
        }
        if payload.len() > declared {
            return Err(CodecError::TrailingBytes(payload.len() - declared));
        }

        let message = match kind {
            MessageKind::Sync => Message::Sync(serde_json::from_slice::<SyncMessage>(payload)?),
            MessageKind::Error => Message::Error(serde_json::from_slice::<ErrorMessage>(payload)?),
        };
        Ok(message)
    }
}

impl Message {
    /// Encode this message with the default codec.
    ///
    /// # Errors
    ///
    /// See [`MessageCodec::pack`].
    pub fn pack(&self) -> Result<Vec<u8>, CodecError> {
        MessageCodec::new().pack(self)
    }

    /// Decode a frame with the default codec.
    ///
    /// # Errors
    ///
    /// See [`MessageCodec::unpack`].
    pub fn unpack(frame: &[u8]) -> Result<Self, CodecError> {
        MessageCodec::new().unpack(frame)
    }
}
