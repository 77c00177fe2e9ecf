//! Protocol module - wire format and framing for the chat streaming
//! connection.
//!
//! - 16-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;

pub use frame::{Frame, Opcode, DEFAULT_MAX_FRAME_LEN, HEADER_SIZE};
pub use frame_buffer::FrameBuffer;
