//! Engine error types.

use thiserror::Error;

/// Everything the engine's fallible operations can report.
///
/// Malformed wire input is rejected, never panicked on; each rejection
/// reason is its own variant so callers can tell the recoverable conditions
/// apart. A dead link is deliberately *not* here — it is a sticky state
/// queried through [`Engine::is_dead_link`](crate::engine::Engine::is_dead_link).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// `send`: the payload needs more fragments than the one-byte fragment
    /// field can number.
    #[error("message needs {fragments} fragments, the wire format allows 255")]
    MessageTooLarge { fragments: usize },

    /// `recv`: the receive queue holds no complete message yet.
    #[error("no complete message ready")]
    NoMessageReady,

    /// `recv`: the caller's buffer cannot hold the assembled message.
    #[error("receive buffer too small, assembled message is {needed} bytes")]
    BufferTooSmall { needed: usize },

    /// `input`: the datagram is shorter than one segment header.
    #[error("datagram shorter than the 24-byte segment header")]
    DatagramTooShort,

    /// `input`: the datagram belongs to a different conversation.
    #[error("conversation id mismatch: expected {expected:#010x}, got {got:#010x}")]
    ConversationMismatch { expected: u32, got: u32 },

    /// `input`: a segment declares more payload than the datagram holds.
    #[error("declared payload of {declared} bytes exceeds the {remaining} remaining")]
    PayloadOverrun { declared: usize, remaining: usize },

    /// `input`: command byte outside PUSH/ACK/WASK/WINS.
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),

    /// `set_mtu`: below the protocol minimum.
    #[error("mtu of {0} bytes is below the 50-byte minimum")]
    InvalidMtu(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_conversation_ids_as_hex() {
        let err = Error::ConversationMismatch {
            expected: 0x11223344,
            got: 0x55667788,
        };
        assert_eq!(
            err.to_string(),
            "conversation id mismatch: expected 0x11223344, got 0x55667788"
        );
    }

    #[test]
    fn variants_are_comparable() {
        assert_eq!(Error::NoMessageReady, Error::NoMessageReady);
        assert_ne!(
            Error::BufferTooSmall { needed: 8 },
            Error::BufferTooSmall { needed: 9 }
        );
    }
}
