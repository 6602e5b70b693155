//! Lossy-link simulation toolkit for integration testing.
//!
//! Provides a seeded two-way datagram link with configurable loss, latency
//! jitter, and queue capacity, plus deterministic echo scenario generation
//! for testing engine behaviour under controlled network conditions. No
//! sockets and no wall time: everything advances on a virtual millisecond
//! clock, so runs are exactly reproducible.

pub mod link;

pub mod scenario;

pub mod test_util;
