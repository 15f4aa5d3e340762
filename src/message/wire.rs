//! Length-prefixed framing of [`AclMessage`]s for the network bridge.
//!
//! Each frame is a big-endian `u32` body length followed by the JSON encoded
//! message.

use super::AclMessage;
use crate::error::WireError;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4;

/// Encode a message into a single frame.
pub fn encode(message: &AclMessage) -> Result<Vec<u8>, WireError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental decoder for a byte stream of frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one has fully arrived.
    ///
    /// An oversized length header poisons the stream, so the buffer is
    /// dropped before the error is returned.
    pub fn next_message(&mut self) -> Result<Option<AclMessage>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            self.buf.clear();
            return Err(WireError::FrameTooLarge(len));
        }

        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..HEADER_LEN + len).collect();
        let message = serde_json::from_slice(&frame[HEADER_LEN..])?;
        Ok(Some(message))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
