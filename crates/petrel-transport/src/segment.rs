//! In-flight segment representation.
//!
//! A [`Segment`] is one fragment of a user message plus the bookkeeping the
//! retransmission machinery needs. Every segment lives in exactly one of the
//! engine's four lists at a time; moving it between lists transfers ownership
//! of the value.

use bytes::{Bytes, BytesMut};

use crate::wire::{Command, SegmentHeader, HEADER_LEN};

#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub conv: u32,
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    /// Engine-clock deadline for the next retransmission.
    pub resend_at: u32,
    /// Per-segment RTO, backed off on every timeout resend.
    pub rto: u32,
    /// Count of later acks that skipped this segment.
    pub fast_acks: u32,
    /// Transmission attempts so far; 0 until first flush.
    pub xmit: u32,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(cmd: Command, payload: Bytes) -> Self {
        Segment {
            conv: 0,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            resend_at: 0,
            rto: 0,
            fast_acks: 0,
            xmit: 0,
            payload,
        }
    }

    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            conv: self.conv,
            cmd: self.cmd as u8,
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn,
            una: self.una,
            len: self.payload.len() as u32,
        }
    }

    /// Bytes this segment occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append header and payload to an output batch.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        self.header().encode(buf);
        buf.extend_from_slice(&self.payload);
    }
}
