//! Two-way lossy datagram link with seeded impairment.
//!
//! Each direction gets half the configured loss rate and half the configured
//! round-trip bounds, so the full path adds up to the requested RTT. Queued
//! datagrams ripen on a virtual clock: `recv` releases the head of the queue
//! once its delivery time has passed, which gives variable delay without
//! reordering, the way a single bottleneck path behaves.

use std::collections::VecDeque;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use tracing::trace;

/// Which peer is talking. `A` sends into the a→b queue and receives from
/// the b→a queue; `B` the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Impairment bounds for a [`SimLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// RNG seed; equal seeds replay the identical impairment sequence.
    pub seed: u64,
    /// Datagram loss across the full path, percent.
    pub loss_percent: u32,
    /// Round-trip latency lower bound (ms).
    pub rtt_min_ms: u32,
    /// Round-trip latency upper bound (ms).
    pub rtt_max_ms: u32,
    /// Per-direction queue depth; overflow datagrams are dropped.
    pub capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            seed: 42,
            loss_percent: 10,
            rtt_min_ms: 60,
            rtt_max_ms: 125,
            capacity: 1000,
        }
    }
}

/// Traffic counters per direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectionStats {
    pub queued: u64,
    pub delivered: u64,
    pub lost: u64,
    pub overflowed: u64,
}

#[derive(Debug)]
struct Delayed {
    deliver_at: u32,
    data: Bytes,
}

/// Deterministic two-way lossy link.
///
/// Externally clocked: callers pass the current virtual time to both
/// [`SimLink::send`] and [`SimLink::recv`]. A single seeded [`StdRng`]
/// drives loss and delay decisions for both directions.
#[derive(Debug)]
pub struct SimLink {
    // per-direction impairment, derived from the full-path config
    loss_percent: u32,
    delay_min: u32,
    delay_max: u32,
    capacity: usize,

    rng: StdRng,
    a_to_b: VecDeque<Delayed>,
    b_to_a: VecDeque<Delayed>,
    stats_a_to_b: DirectionStats,
    stats_b_to_a: DirectionStats,
}

impl SimLink {
    pub fn new(config: LinkConfig) -> Self {
        SimLink {
            loss_percent: config.loss_percent / 2,
            delay_min: config.rtt_min_ms / 2,
            delay_max: config.rtt_max_ms / 2,
            capacity: config.capacity,
            rng: StdRng::seed_from_u64(config.seed),
            a_to_b: VecDeque::new(),
            b_to_a: VecDeque::new(),
            stats_a_to_b: DirectionStats::default(),
            stats_b_to_a: DirectionStats::default(),
        }
    }

    /// Submit a datagram from `from` toward the other peer at virtual time
    /// `now`. It is either dropped by loss or overflow, or queued to ripen
    /// after a randomized one-way delay.
    pub fn send(&mut self, from: Side, datagram: &[u8], now: u32) {
        let roll = self.rng.random::<u32>() % 100;
        let span = (self.delay_max - self.delay_min).max(1);
        let delay = self.delay_min + self.rng.random::<u32>() % span;

        let (queue, stats) = match from {
            Side::A => (&mut self.a_to_b, &mut self.stats_a_to_b),
            Side::B => (&mut self.b_to_a, &mut self.stats_b_to_a),
        };

        if roll < self.loss_percent {
            stats.lost += 1;
            trace!(?from, len = datagram.len(), "datagram lost");
            return;
        }
        if queue.len() >= self.capacity {
            stats.overflowed += 1;
            trace!(?from, depth = queue.len(), "queue overflow");
            return;
        }

        queue.push_back(Delayed {
            deliver_at: now.wrapping_add(delay),
            data: Bytes::copy_from_slice(datagram),
        });
        stats.queued += 1;
    }

    /// Take the next ripe datagram addressed to `to`, if any.
    ///
    /// Only the queue head is considered: a slow datagram holds back faster
    /// ones behind it, so the link delays but never reorders.
    pub fn recv(&mut self, to: Side, now: u32) -> Option<Bytes> {
        let (queue, stats) = match to {
            Side::A => (&mut self.b_to_a, &mut self.stats_b_to_a),
            Side::B => (&mut self.a_to_b, &mut self.stats_a_to_b),
        };

        let head = queue.front()?;
        if (now.wrapping_sub(head.deliver_at) as i32) < 0 {
            return None;
        }
        let delayed = queue.pop_front()?;
        stats.delivered += 1;
        Some(delayed.data)
    }

    /// Datagrams currently in flight toward `to`.
    pub fn pending(&self, to: Side) -> usize {
        match to {
            Side::A => self.b_to_a.len(),
            Side::B => self.a_to_b.len(),
        }
    }

    /// Counters for the direction that delivers to `to`.
    pub fn stats(&self, to: Side) -> DirectionStats {
        match to {
            Side::A => self.stats_b_to_a,
            Side::B => self.stats_a_to_b,
        }
    }
}
