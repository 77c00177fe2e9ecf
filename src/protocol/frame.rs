//! Wire format encoding and decoding for the chat platform's streaming
//! connection.
//!
//! Implements the 16-byte header format:
//! ```text
//! ┌───────────┬────────────┬─────────┬──────────┬──────────┐
//! │ Total Len │ Header Len │ Version │ Opcode   │ Sequence │
//! │ 4 bytes   │ 2 bytes    │ 2 bytes │ 4 bytes  │ 4 bytes  │
//! │ uint32 BE │ uint16 BE  │ u16 BE  │ uint32 BE│ uint32 BE│
//! └───────────┴────────────┴─────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `total_len` covers header plus
//! body, so `body = bytes[header_len..total_len]`.

use bytes::Bytes;

use crate::error::{Result, SceneVoteError};

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Default maximum frame length (header + body) accepted from the wire.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 2048;

/// Operations carried by a frame.
///
/// Unknown opcodes decode to [`Opcode::Unknown`] rather than failing; the
/// receive loop simply ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Client -> server keepalive, empty body.
    Heartbeat,
    /// Server ack of a heartbeat.
    HeartbeatReply,
    /// Server push carrying a JSON message envelope.
    MessageReply,
    /// Client -> server authentication, body is the opaque auth payload.
    Auth,
    /// Server reply to AUTH, body is a JSON status object.
    AuthReply,
    /// Any opcode this client does not speak.
    Unknown(u32),
}

impl Opcode {
    /// Wire value for this opcode.
    pub fn as_u32(self) -> u32 {
        match self {
            Opcode::Heartbeat => 2,
            Opcode::HeartbeatReply => 3,
            Opcode::MessageReply => 5,
            Opcode::Auth => 7,
            Opcode::AuthReply => 8,
            Opcode::Unknown(n) => n,
        }
    }
}

impl From<u32> for Opcode {
    fn from(n: u32) -> Self {
        match n {
            2 => Opcode::Heartbeat,
            3 => Opcode::HeartbeatReply,
            5 => Opcode::MessageReply,
            7 => Opcode::Auth,
            8 => Opcode::AuthReply,
            other => Opcode::Unknown(other),
        }
    }
}

/// A complete protocol frame.
///
/// Immutable once decoded; construct a fresh one for each send.
/// Uses `bytes::Bytes` for zero-copy body sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version; 0 for plain JSON bodies.
    pub version: u16,
    /// Operation this frame carries.
    pub opcode: Opcode,
    /// Monotonic sequence number assigned by the sender.
    pub sequence: u32,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with version 0 and the given opcode, sequence and body.
    pub fn new(opcode: Opcode, sequence: u32, body: Bytes) -> Self {
        Self {
            version: 0,
            opcode,
            sequence,
            body,
        }
    }

    /// Create an empty-body frame (heartbeats).
    pub fn empty(opcode: Opcode, sequence: u32) -> Self {
        Self::new(opcode, sequence, Bytes::new())
    }

    /// Total encoded length of this frame (header + body).
    #[inline]
    pub fn total_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode to wire bytes, recomputing `total_len` from the body length.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_len());
        buf.extend_from_slice(&(self.total_len() as u32).to_be_bytes());
        buf.extend_from_slice(&(HEADER_SIZE as u16).to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.opcode.as_u32().to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Decode a frame from a buffer containing at least one whole frame.
    ///
    /// Pure function, no side effects. Fails with `ProtocolDecode` if the
    /// buffer is shorter than the header, if `total_len` exceeds
    /// `max_frame_len`, or if the declared lengths are inconsistent with the
    /// buffer.
    pub fn decode(buf: &[u8], max_frame_len: u32) -> Result<Frame> {
        if buf.len() < HEADER_SIZE {
            return Err(SceneVoteError::ProtocolDecode(format!(
                "truncated header: got {} bytes, need {}",
                buf.len(),
                HEADER_SIZE
            )));
        }
        let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let header_len = u16::from_be_bytes([buf[4], buf[5]]);
        let version = u16::from_be_bytes([buf[6], buf[7]]);
        let opcode = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let sequence = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if total_len > max_frame_len {
            return Err(SceneVoteError::ProtocolDecode(format!(
                "frame length {} exceeds maximum {}",
                total_len, max_frame_len
            )));
        }
        if (header_len as usize) != HEADER_SIZE {
            return Err(SceneVoteError::ProtocolDecode(format!(
                "unexpected header length {}",
                header_len
            )));
        }
        if (total_len as usize) < HEADER_SIZE || buf.len() < total_len as usize {
            return Err(SceneVoteError::ProtocolDecode(format!(
                "frame length {} inconsistent with buffer of {} bytes",
                total_len,
                buf.len()
            )));
        }

        let body = Bytes::copy_from_slice(&buf[HEADER_SIZE..total_len as usize]);
        Ok(Frame {
            version,
            opcode: Opcode::from(opcode),
            sequence,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = Frame::new(Opcode::Auth, 7, Bytes::from_static(b"{\"token\":\"x\"}"));
        let encoded = original.encode();
        let decoded = Frame::decode(&encoded, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_roundtrip_all_known_opcodes() {
        for opcode in [
            Opcode::Heartbeat,
            Opcode::HeartbeatReply,
            Opcode::MessageReply,
            Opcode::Auth,
            Opcode::AuthReply,
        ] {
            let frame = Frame::new(opcode, 1, Bytes::from_static(b"body"));
            let decoded = Frame::decode(&frame.encode(), DEFAULT_MAX_FRAME_LEN).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_big_endian_byte_order() {
        let frame = Frame {
            version: 0x0102,
            opcode: Opcode::Unknown(0x03040506),
            sequence: 0x0708090A,
            body: Bytes::from_static(b"zz"),
        };
        let bytes = frame.encode();

        // Total length: 18 in BE
        assert_eq!(&bytes[0..4], &[0, 0, 0, 18]);
        // Header length: 16 in BE
        assert_eq!(&bytes[4..6], &[0, 16]);
        // Version
        assert_eq!(&bytes[6..8], &[0x01, 0x02]);
        // Opcode
        assert_eq!(&bytes[8..12], &[0x03, 0x04, 0x05, 0x06]);
        // Sequence
        assert_eq!(&bytes[12..16], &[0x07, 0x08, 0x09, 0x0A]);
        assert_eq!(&bytes[16..], b"zz");
    }

    #[test]
    fn test_total_len_recomputed_on_encode() {
        let frame = Frame::new(Opcode::Heartbeat, 0, Bytes::new());
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &(HEADER_SIZE as u32).to_be_bytes());
    }

    #[test]
    fn test_decode_truncated_header() {
        let buf = [0u8; HEADER_SIZE - 1];
        let result = Frame::decode(&buf, DEFAULT_MAX_FRAME_LEN);
        assert!(matches!(result, Err(SceneVoteError::ProtocolDecode(_))));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("truncated header"));
    }

    #[test]
    fn test_decode_body_too_large() {
        let frame = Frame::new(Opcode::MessageReply, 1, Bytes::from(vec![0u8; 100]));
        let bytes = frame.encode();
        let result = Frame::decode(&bytes, 64);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_inconsistent_length() {
        // Header claims 100 bytes total but buffer only has the header.
        let mut bytes = Frame::empty(Opcode::Heartbeat, 0).encode();
        bytes[0..4].copy_from_slice(&100u32.to_be_bytes());
        let result = Frame::decode(&bytes, DEFAULT_MAX_FRAME_LEN);
        assert!(result.unwrap_err().to_string().contains("inconsistent"));
    }

    #[test]
    fn test_decode_unknown_opcode_is_not_an_error() {
        let frame = Frame::new(Opcode::Unknown(42), 9, Bytes::from_static(b"?"));
        let decoded = Frame::decode(&frame.encode(), DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(decoded.opcode, Opcode::Unknown(42));
    }

    #[test]
    fn test_opcode_wire_values() {
        assert_eq!(Opcode::Heartbeat.as_u32(), 2);
        assert_eq!(Opcode::HeartbeatReply.as_u32(), 3);
        assert_eq!(Opcode::MessageReply.as_u32(), 5);
        assert_eq!(Opcode::Auth.as_u32(), 7);
        assert_eq!(Opcode::AuthReply.as_u32(), 8);
        assert_eq!(Opcode::from(5), Opcode::MessageReply);
        assert_eq!(Opcode::from(99), Opcode::Unknown(99));
    }
}
