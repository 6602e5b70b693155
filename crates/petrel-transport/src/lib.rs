//! # petrel-transport
//!
//! Petrel reliable-ordered ARQ transport engine.
//!
//! KCP-style protocol core: selective acknowledgement with fast retransmit,
//! cumulative-ack window management, slow-start congestion control, and
//! zero-window probing, all over caller-supplied unreliable datagrams. The
//! engine owns no sockets, threads, or timers; the host feeds it wire bytes
//! and millisecond timestamps and ships whatever it emits.
//!
//! ## Crate structure
//!
//! - [`wire`] — 24-byte segment header serialization, command bytes
//! - `segment` — in-flight segment bookkeeping (internal)
//! - [`engine`] — the ARQ state machine: send/recv/input/update/check
//! - [`error`] — protocol and capacity error taxonomy
//! - [`stats`] — cumulative engine counters
//! - [`clock`] — monotonic millisecond clock helper for hosts
//!
//! ## Driving the engine
//!
//! ```no_run
//! use petrel_transport::clock::MillisClock;
//! use petrel_transport::engine::Engine;
//!
//! let clock = MillisClock::new();
//! let mut engine = Engine::new(0x1122_3344, |datagram: &[u8]| {
//!     // hand the bytes to a UDP socket or any lossy channel
//!     let _ = datagram;
//! });
//!
//! engine.send(b"hello").unwrap();
//! loop {
//!     let now = clock.now();
//!     engine.update(now);
//!     // feed incoming datagrams with engine.input(..) as they arrive,
//!     // then sleep until engine.check(now) says the next tick is due
//!     # break;
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub(crate) mod segment;
pub mod stats;
pub mod wire;
