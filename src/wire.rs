//! Wire protocol: frames and (de)serializes messages.
//!
//! Frame format, bit-exact:
//!
//! ```text
//! [4 bytes: payload length, big-endian][1 byte: version = 0x01][payload]
//! ```
//!
//! The payload encoding itself is an implementation detail as long as it
//! round-trips every field exactly; this implementation uses `bincode`
//! over the `serde`-derived [`Message`] enum. `bincode` encodes
//! `Option<T>` as a presence byte followed by the value, which gives a
//! null/non-null round-trip for free.

use crate::error::{CommError, Result};
use crate::message::Message;

/// Protocol version byte written into every frame.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Maximum payload length: 128 MiB.
pub const MAX_PAYLOAD_LEN: u32 = 128 * 1024 * 1024;

const LENGTH_PREFIX_LEN: usize = 4;
const HEADER_LEN: usize = LENGTH_PREFIX_LEN + 1;

/// Frames and deserializes messages across reconnects.
///
/// Owns an accumulator holding exactly the unconsumed tail of the byte
/// stream. Not thread-safe by design — callers hold the per-channel
/// receive lock; a [`CommunicationChannel`] (see `crate::channel`) owns
/// one instance exclusively.
#[derive(Debug, Default)]
pub struct WireProtocol {
    accumulator: Vec<u8>,
}

impl WireProtocol {
    pub fn new() -> Self {
        Self {
            accumulator: Vec::new(),
        }
    }

    /// Serialize `message` into a single frame: length prefix, version
    /// byte, payload. Fails if the serialized payload exceeds
    /// [`MAX_PAYLOAD_LEN`].
    pub fn get_bytes(&self, message: &Message) -> Result<Vec<u8>> {
        let payload = bincode::serialize(message)
            .map_err(|e| CommError::Malformed(e.to_string()))?;

        if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(CommError::FrameTooLarge {
                len: payload.len() as u32,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Discard the accumulator. Called on every (re)connect.
    pub fn reset(&mut self) {
        self.accumulator.clear();
    }

    /// Append `chunk` to the internal accumulator, then extract every whole
    /// frame currently available, in order. Never blocks.
    ///
    /// On a framing or deserialization error, the accumulator is reset
    /// before the error is returned, so a poisoned byte stream cannot wedge
    /// subsequent calls.
    pub fn create_messages(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.accumulator.extend_from_slice(chunk);

        let mut messages = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
        Ok(messages)
    }

    /// Attempt to pull exactly one frame off the front of the accumulator.
    /// Returns `Ok(None)` if fewer bytes than a full frame are buffered.
    fn try_extract_one(&mut self) -> Result<Option<Message>> {
        if self.accumulator.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let len_bytes: [u8; 4] = self.accumulator[..LENGTH_PREFIX_LEN]
            .try_into()
            .expect("slice is exactly 4 bytes");
        let payload_len = u32::from_be_bytes(len_bytes);

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(CommError::FrameTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let frame_len = HEADER_LEN + payload_len as usize;
        if self.accumulator.len() < frame_len {
            return Ok(None);
        }

        let version = self.accumulator[LENGTH_PREFIX_LEN];
        if version != PROTOCOL_VERSION {
            return Err(CommError::UnsupportedVersion {
                found: version,
                expected: PROTOCOL_VERSION,
            });
        }

        let payload = &self.accumulator[HEADER_LEN..frame_len];
        let message: Message = bincode::deserialize(payload)
            .map_err(|e| CommError::Malformed(e.to_string()))?;

        self.accumulator.drain(..frame_len);
        Ok(Some(message))
    }
}
