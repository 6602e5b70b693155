#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use petrel_transport::wire::{Command, SegmentHeader};

/// Fuzz the segment header codec.
///
/// This target exercises:
/// - SegmentHeader::decode (24-byte little-endian layout)
/// - Command::from_byte (command byte dispatch)
/// - encode → decode round-trip stability for anything that parses
///
/// The decoder must never panic; malformed or short input returns `None`.
fuzz_target!(|data: &[u8]| {
    let mut buf = data;
    if let Some(header) = SegmentHeader::decode(&mut buf) {
        let _ = Command::from_byte(header.cmd);

        let mut encoded = BytesMut::new();
        header.encode(&mut encoded);
        let mut round = &encoded[..];
        let again = SegmentHeader::decode(&mut round).expect("encoded header must decode");
        assert_eq!(header, again);
    }

    // walk the rest of the buffer the way a datagram parser would
    while let Some(header) = SegmentHeader::decode(&mut buf) {
        let len = header.len as usize;
        if len > buf.remaining() {
            break;
        }
        buf.advance(len);
    }
});
