//! Frame buffer for accumulating partial reads.
//!
//! The streaming connection may deliver several frames in one message or
//! split a frame across messages. Uses `bytes::BytesMut` and a small state
//! machine:
//! - `WaitingForHeader`: need at least 16 bytes
//! - `WaitingForBody`: header parsed, need the rest of `total_len`

use bytes::BytesMut;

use super::frame::{Frame, HEADER_SIZE};
use crate::error::{Result, SceneVoteError};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete 16-byte header.
    WaitingForHeader,
    /// Header peeked, waiting until `total_len` bytes are buffered.
    WaitingForBody { total_len: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_len: u32,
}

impl FrameBuffer {
    /// Create a frame buffer enforcing the given maximum frame length.
    pub fn new(max_frame_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::WaitingForHeader,
            max_frame_len,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push. Returns an
    /// error if a frame violates the length limits; the caller decides
    /// whether to drop the frame or the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let total_len =
                    u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                        as usize;
                // Reject before buffering up to a hostile length claim.
                if total_len > self.max_frame_len as usize {
                    return Err(SceneVoteError::ProtocolDecode(format!(
                        "frame length {} exceeds maximum {}",
                        total_len, self.max_frame_len
                    )));
                }
                self.state = State::WaitingForBody { total_len };
                self.try_extract_one()
            }
            State::WaitingForBody { total_len } => {
                if self.buffer.len() < total_len.max(HEADER_SIZE) {
                    return Ok(None);
                }
                let take = total_len.max(HEADER_SIZE);
                let raw = self.buffer.split_to(take);
                self.state = State::WaitingForHeader;
                let frame = Frame::decode(&raw, self.max_frame_len)?;
                Ok(Some(frame))
            }
        }
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }
}
