//! Engine counters.

use serde::Serialize;

/// Cumulative protocol counters for one conversation.
///
/// Updated inline by the engine's hot paths; read through
/// [`Engine::stats`](crate::engine::Engine::stats). Serializable so hosts can export
/// snapshots as JSON.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct EngineStats {
    /// Data segments handed to the output hook, resends included.
    pub segments_sent: u64,
    /// In-window data segments accepted from the peer (duplicates excluded).
    pub segments_received: u64,
    /// ACK segments emitted.
    pub acks_sent: u64,
    /// ACK segments processed from the peer.
    pub acks_received: u64,
    /// Segments resent because their RTO expired.
    pub timeout_retransmits: u64,
    /// Segments resent by the duplicate-ack fast path.
    pub fast_retransmits: u64,
    /// Zero-window probes (WASK) sent.
    pub probes_sent: u64,
    /// Window reports (WINS) sent.
    pub window_tells_sent: u64,
    /// Datagram batches handed to the output hook.
    pub datagrams_output: u64,
    /// Payload bytes accepted by `send`.
    pub bytes_queued: u64,
    /// Payload bytes handed back by `recv`.
    pub bytes_delivered: u64,
}
