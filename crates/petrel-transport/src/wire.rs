//! # Petrel Wire Format
//!
//! Fixed 24-byte little-endian segment header. A datagram carries one or
//! more segments back to back, each header followed by `len` payload bytes.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Conversation ID (32)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Cmd (8)     |   Frg (8)     |          Window (16)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Timestamp (32)                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Sequence Number (32)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Cumulative Ack / Una (32)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Payload Length (32)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All multi-byte fields are little-endian. The fragment index counts down:
//! `count-1` on the first fragment of a message, `0` on the last.

use bytes::{Buf, BufMut, BytesMut};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Encoded size of a segment header.
pub const HEADER_LEN: usize = 24;

/// Maximum number of fragments a single message may span (`frg` is one
/// byte, so indices run `MAX_FRAGMENTS - 1` down to 0).
pub const MAX_FRAGMENTS: usize = 255;

// ─── Commands ────────────────────────────────────────────────────────────────

/// Segment command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Data segment.
    Push = 81,
    /// Acknowledgment for one received data segment.
    Ack = 82,
    /// Zero-window probe ("what is your window?").
    WindowAsk = 83,
    /// Window report, answering a probe or announcing recovery.
    WindowTell = 84,
}

impl Command {
    /// Map a wire byte back to a command. Any other value is a protocol error.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            81 => Some(Command::Push),
            82 => Some(Command::Ack),
            83 => Some(Command::WindowAsk),
            84 => Some(Command::WindowTell),
            _ => None,
        }
    }
}

// ─── Segment Header ──────────────────────────────────────────────────────────

/// Decoded segment header — one per segment, several may share a datagram.
///
/// `cmd` stays a raw byte here so a datagram can be decoded field-by-field
/// before command validation; [`Command::from_byte`] is the checked step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Conversation id; must match on both peers.
    pub conv: u32,
    /// Command byte (see [`Command`]).
    pub cmd: u8,
    /// Fragment index, counting down to 0 on the final fragment.
    pub frg: u8,
    /// Sender's free receive window, in segments.
    pub wnd: u16,
    /// Sender's clock at transmission (ms, wraps).
    pub ts: u32,
    /// Sequence number (wraps; compare via signed difference only).
    pub sn: u32,
    /// Cumulative ack: every sequence number below this was received.
    pub una: u32,
    /// Payload bytes following this header.
    pub len: u32,
}

impl SegmentHeader {
    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode a header, or `None` when fewer than [`HEADER_LEN`] bytes remain.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < HEADER_LEN {
            return None;
        }
        let conv = buf.get_u32_le();
        let cmd = buf.get_u8();
        let frg = buf.get_u8();
        let wnd = buf.get_u16_le();
        let ts = buf.get_u32_le();
        let sn = buf.get_u32_le();
        let una = buf.get_u32_le();
        let len = buf.get_u32_le();
        Some(SegmentHeader {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }
}
