//! Host-side millisecond clock.
//!
//! The engine never reads time itself — `update` and `check` take the
//! caller's clock. [`MillisClock`] is the convenience source hosts feed it
//! from when they are not running on a virtual clock.

use quanta::Instant;

/// Monotonic 32-bit millisecond clock anchored at construction.
///
/// Wraps modulo 2^32 (about 49.7 days), matching the wrap-aware arithmetic
/// the engine uses for timestamps.
#[derive(Debug, Clone)]
pub struct MillisClock {
    origin: Instant,
}

impl MillisClock {
    pub fn new() -> Self {
        MillisClock {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since construction, truncated to 32 bits.
    pub fn now(&self) -> u32 {
        (self.origin.elapsed().as_millis() & 0xFFFF_FFFF) as u32
    }
}

impl Default for MillisClock {
    fn default() -> Self {
        Self::new()
    }
}
