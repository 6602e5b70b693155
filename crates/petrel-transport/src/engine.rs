//! The ARQ engine.
//!
//! ## Responsibilities
//!
//! - fragmentation and submission ([`Engine::send`])
//! - reassembly and delivery ([`Engine::recv`] / [`Engine::peek_size`])
//! - wire parsing, ack/una processing, fast-retransmit accounting
//!   ([`Engine::input`])
//! - retransmission, congestion and flow control (flush, driven by
//!   [`Engine::update`])
//! - flush scheduling and RTT estimation ([`Engine::update`] /
//!   [`Engine::check`])
//!
//! The engine performs no I/O and never reads a clock: callers drive it with
//! millisecond timestamps and receive wire datagrams through the [`Output`]
//! hook. One engine instance serves exactly one conversation, identified by
//! a 32-bit id that must match on both peers.
//!
//! Everything here is single-threaded by design. Operations take `&mut self`,
//! never block, and never call the output hook re-entrantly.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::Error;
use crate::segment::Segment;
use crate::stats::EngineStats;
use crate::wire::{Command, SegmentHeader, HEADER_LEN, MAX_FRAGMENTS};

// ─── Protocol Constants ──────────────────────────────────────────────────────

/// RTO floor in no-delay mode (ms).
pub const RTO_NDL: u32 = 30;
/// RTO floor in normal mode (ms).
pub const RTO_MIN: u32 = 100;
/// Initial RTO before the first sample (ms).
pub const RTO_DEF: u32 = 200;
/// RTO ceiling (ms).
pub const RTO_MAX: u32 = 60_000;
/// Default send window (segments).
pub const WND_SND: u16 = 32;
/// Default receive window (segments).
pub const WND_RCV: u16 = 32;
/// Default maximum transmission unit (bytes).
pub const MTU_DEF: usize = 1400;
/// Suggested duplicate-ack threshold for fast retransmit.
pub const ACK_FAST: u32 = 3;
/// Default flush interval (ms).
pub const INTERVAL: u32 = 100;
/// Default retransmit-count threshold for the dead-link flag.
pub const DEADLINK: u32 = 20;
/// Initial slow-start threshold (segments).
pub const THRESH_INIT: u32 = 2;
/// Slow-start threshold floor (segments).
pub const THRESH_MIN: u32 = 2;
/// First zero-window probe delay (ms).
pub const PROBE_INIT: u32 = 7_000;
/// Zero-window probe backoff ceiling (ms).
pub const PROBE_LIMIT: u32 = 120_000;

const PROBE_ASK_SEND: u8 = 1;
const PROBE_ASK_TELL: u8 = 2;

const INTERVAL_MIN: u32 = 10;
const INTERVAL_MAX: u32 = 5_000;

/// Smallest MTU `set_mtu` accepts.
const MTU_MIN: usize = 50;

/// Clock-jump tolerance before the flush clock is resnapped (ms).
const CLOCK_JUMP_LIMIT: i32 = 10_000;

// ─── Wrap-Aware Arithmetic ───────────────────────────────────────────────────

/// Signed distance between two wrapping 32-bit values.
///
/// Positive means `later` is logically after `earlier`; correct as long as
/// the two values are within 2^31 of each other. Used for both sequence
/// numbers and millisecond timestamps, never direct ordering.
#[inline]
pub(crate) fn wrapping_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

// ─── Output Hook ─────────────────────────────────────────────────────────────

/// Datagram transmission hook handed to [`Engine::new`].
///
/// Called synchronously from inside flush, once per MTU-sized batch, with
/// wire bytes for the peer. The callee forwards them unreliably and returns;
/// it must not call back into the engine.
pub trait Output {
    fn transmit(&mut self, datagram: &[u8]);
}

impl<F: FnMut(&[u8])> Output for F {
    fn transmit(&mut self, datagram: &[u8]) {
        self(datagram)
    }
}

// ─── RTT Estimation ──────────────────────────────────────────────────────────

/// Jacobson/Karels-style smoothed RTT tracker, integer arithmetic.
#[derive(Debug)]
struct RttEstimator {
    /// Smoothed round-trip time (ms); 0 until the first sample.
    srtt: i32,
    /// Mean deviation (ms).
    rttval: i32,
    /// Current retransmission timeout (ms).
    rto: u32,
    /// Lower clamp for `rto`.
    min_rto: u32,
}

impl RttEstimator {
    fn new() -> Self {
        RttEstimator {
            srtt: 0,
            rttval: 0,
            rto: RTO_DEF,
            min_rto: RTO_MIN,
        }
    }

    /// Fold one round-trip sample in and refresh the timeout.
    ///
    /// First sample seeds the filter; afterwards the usual 7/8 and 3/4
    /// exponential weights apply, with the smoothed RTT floored at 1 ms.
    fn update(&mut self, rtt: i32, interval: u32) {
        // A forged or corrupt timestamp can yield an absurd sample; cap it
        // at the RTO ceiling so the filter arithmetic stays in range.
        let rtt = rtt.min(RTO_MAX as i32);
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttval = rtt / 2;
        } else {
            let delta = (rtt - self.srtt).abs();
            self.rttval = (3 * self.rttval + delta) / 4;
            self.srtt = (7 * self.srtt + rtt) / 8;
            if self.srtt < 1 {
                self.srtt = 1;
            }
        }
        let rto = self.srtt as u32 + interval.max(4 * self.rttval as u32);
        // Floor before ceiling, so a floor set above RTO_MAX pins at RTO_MAX.
        self.rto = rto.max(self.min_rto).min(RTO_MAX);
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Construction-time tuning for [`Engine::with_config`].
///
/// Every field is also runtime-settable through the corresponding setter;
/// `Default` is the protocol's stock configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// No-delay mode: RTO floor [`RTO_NDL`] and halved retransmit backoff.
    pub nodelay: bool,
    /// Flush interval (ms), clamped to [10, 5000].
    pub interval_ms: u32,
    /// Duplicate-ack threshold for fast retransmit; 0 disables it.
    pub fast_resend: u32,
    /// Cap the send rate with the congestion window.
    pub congestion_control: bool,
    /// Send window (segments).
    pub send_window: u16,
    /// Receive window (segments).
    pub recv_window: u16,
    /// Maximum transmission unit (bytes), at least 50.
    pub mtu: usize,
    /// Explicit RTO floor override (ms); `None` derives it from `nodelay`.
    pub min_rto: Option<u32>,
    /// Transmit-count threshold for the sticky dead-link flag.
    pub dead_link: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            nodelay: false,
            interval_ms: INTERVAL,
            fast_resend: 0,
            congestion_control: true,
            send_window: WND_SND,
            recv_window: WND_RCV,
            mtu: MTU_DEF,
            min_rto: None,
            dead_link: DEADLINK,
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Reliable-ordered ARQ state machine for one conversation.
pub struct Engine<O: Output> {
    conv: u32,
    mtu: usize,
    mss: usize,

    // sequence space
    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    // windows (segments)
    snd_wnd: u16,
    rcv_wnd: u16,
    rmt_wnd: u16,

    // congestion control
    cwnd: u32,
    incr: u32,
    ssthresh: u32,
    congestion_control: bool,

    // retransmission tuning
    rtt: RttEstimator,
    nodelay: bool,
    fast_resend: u32,
    dead_link_after: u32,
    dead_link: bool,

    // zero-window probing
    probe: u8,
    ts_probe: u32,
    probe_wait: u32,

    // flush scheduling
    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,

    // buffers
    snd_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    acklist: Vec<(u32, u32)>,
    out_buf: BytesMut,

    output: O,
    stats: EngineStats,
}

impl<O: Output> Engine<O> {
    /// Engine with the stock configuration.
    pub fn new(conv: u32, output: O) -> Self {
        Engine {
            conv,
            mtu: MTU_DEF,
            mss: MTU_DEF - HEADER_LEN,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            snd_wnd: WND_SND,
            rcv_wnd: WND_RCV,
            rmt_wnd: WND_RCV,
            cwnd: 0,
            incr: 0,
            ssthresh: THRESH_INIT,
            congestion_control: true,
            rtt: RttEstimator::new(),
            nodelay: false,
            fast_resend: 0,
            dead_link_after: DEADLINK,
            dead_link: false,
            probe: 0,
            ts_probe: 0,
            probe_wait: 0,
            current: 0,
            interval: INTERVAL,
            ts_flush: INTERVAL,
            updated: false,
            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            acklist: Vec::new(),
            out_buf: BytesMut::with_capacity((MTU_DEF + HEADER_LEN) * 3),
            output,
            stats: EngineStats::default(),
        }
    }

    /// Engine with explicit tuning. Fails only on an invalid MTU.
    pub fn with_config(conv: u32, config: EngineConfig, output: O) -> Result<Self, Error> {
        let mut engine = Engine::new(conv, output);
        engine.set_mtu(config.mtu)?;
        engine.set_nodelay(config.nodelay);
        engine.set_interval(config.interval_ms);
        engine.set_fast_resend(config.fast_resend);
        engine.set_congestion_control(config.congestion_control);
        engine.set_window_size(config.send_window, config.recv_window);
        if let Some(min_rto) = config.min_rto {
            engine.set_min_rto(min_rto);
        }
        engine.set_dead_link(config.dead_link);
        Ok(engine)
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// Conversation id this engine was built with.
    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// Maximum payload bytes per segment at the current MTU.
    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Segments waiting to be sent plus segments in flight.
    pub fn pending_send_count(&self) -> usize {
        self.snd_queue.len() + self.snd_buf.len()
    }

    /// Sticky flag: some segment exceeded the dead-link retransmit threshold
    /// and the conversation should be torn down.
    pub fn is_dead_link(&self) -> bool {
        self.dead_link
    }

    /// Cumulative protocol counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    // ─── Tuning ──────────────────────────────────────────────────────────────

    /// Toggle no-delay mode: lowers the RTO floor to [`RTO_NDL`] and halves
    /// the retransmit backoff growth.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
        self.rtt.min_rto = if nodelay { RTO_NDL } else { RTO_MIN };
    }

    /// Flush interval in milliseconds, clamped to [10, 5000].
    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval = interval_ms.clamp(INTERVAL_MIN, INTERVAL_MAX);
    }

    /// Duplicate-ack threshold for fast retransmit; 0 disables the fast path.
    pub fn set_fast_resend(&mut self, threshold: u32) {
        self.fast_resend = threshold;
    }

    /// When disabled, only the peer's advertised window limits the send rate.
    pub fn set_congestion_control(&mut self, enabled: bool) {
        self.congestion_control = enabled;
    }

    /// Window sizes in segments; zero leaves that side unchanged.
    pub fn set_window_size(&mut self, send: u16, recv: u16) {
        if send > 0 {
            self.snd_wnd = send;
        }
        if recv > 0 {
            self.rcv_wnd = recv;
        }
    }

    /// Maximum transmission unit; rejects anything under 50 bytes.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), Error> {
        if mtu < MTU_MIN {
            return Err(Error::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        self.mss = mtu - HEADER_LEN;
        self.out_buf = BytesMut::with_capacity((mtu + HEADER_LEN) * 3);
        Ok(())
    }

    /// Explicit RTO floor override in milliseconds.
    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.rtt.min_rto = min_rto;
    }

    /// Retransmit-count threshold after which the link is declared dead.
    pub fn set_dead_link(&mut self, threshold: u32) {
        self.dead_link_after = threshold;
    }

    // ─── Send Path ───────────────────────────────────────────────────────────

    /// Queue one application message for transmission.
    ///
    /// The payload is split into at most [`MAX_FRAGMENTS`] segments of `mss`
    /// bytes; fragment indices count down so the receiver detects message
    /// completion on index 0. Sequence numbers are assigned later, when the
    /// window admits the segments at flush time. A zero-length payload is
    /// legal and travels as a single empty segment.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        debug_assert!(self.mss > 0);

        let count = if data.len() <= self.mss {
            1
        } else {
            data.len().div_ceil(self.mss)
        };
        if count > MAX_FRAGMENTS {
            return Err(Error::MessageTooLarge { fragments: count });
        }

        if data.is_empty() {
            self.snd_queue
                .push_back(Segment::new(Command::Push, Bytes::new()));
        } else {
            for (i, chunk) in data.chunks(self.mss).enumerate() {
                let mut seg = Segment::new(Command::Push, Bytes::copy_from_slice(chunk));
                seg.frg = (count - 1 - i) as u8;
                self.snd_queue.push_back(seg);
            }
        }

        self.stats.bytes_queued += data.len() as u64;
        trace!(len = data.len(), fragments = count, "send");
        Ok(())
    }

    // ─── Receive Path ────────────────────────────────────────────────────────

    /// Size of the next complete message, or `None` while fragments are
    /// still missing.
    pub fn peek_size(&self) -> Option<usize> {
        let head = self.rcv_queue.front()?;
        if head.frg == 0 {
            return Some(head.payload.len());
        }
        if self.rcv_queue.len() < head.frg as usize + 1 {
            return None;
        }
        let mut total = 0;
        for seg in &self.rcv_queue {
            total += seg.payload.len();
            if seg.frg == 0 {
                break;
            }
        }
        Some(total)
    }

    /// Copy the next complete message into `buf` and return its size.
    ///
    /// Consumes the message's segments from the receive queue, then promotes
    /// whatever became contiguous from the receive buffer. If the receive
    /// window had closed and this call reopened it, a window report is
    /// scheduled for the next flush so the peer resumes promptly.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.rcv_queue.is_empty() {
            return Err(Error::NoMessageReady);
        }
        let size = match self.peek_size() {
            Some(size) => size,
            None => return Err(Error::NoMessageReady),
        };
        if size > buf.len() {
            return Err(Error::BufferTooSmall { needed: size });
        }

        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut offset = 0;
        while let Some(seg) = self.rcv_queue.pop_front() {
            buf[offset..offset + seg.payload.len()].copy_from_slice(&seg.payload);
            offset += seg.payload.len();
            trace!(sn = seg.sn, frg = seg.frg, "recv");
            if seg.frg == 0 {
                break;
            }
        }
        debug_assert_eq!(offset, size);

        self.promote_rcv_buf();

        if self.rcv_queue.len() < self.rcv_wnd as usize && recover {
            self.probe |= PROBE_ASK_TELL;
        }

        self.stats.bytes_delivered += size as u64;
        Ok(size)
    }

    // ─── Input Path ──────────────────────────────────────────────────────────

    /// Feed one raw datagram from the wire into the engine.
    ///
    /// A datagram may carry several segments; each is validated and applied
    /// in order. On a malformed segment the rest of the datagram is discarded
    /// and an error returned, but effects of segments already processed in
    /// the same datagram are kept. A trailing fragment shorter than one
    /// header after at least one full segment is ignored.
    pub fn input(&mut self, data: &[u8]) -> Result<(), Error> {
        trace!(len = data.len(), "input datagram");
        if data.len() < HEADER_LEN {
            return Err(Error::DatagramTooShort);
        }

        let prev_una = self.snd_una;
        let mut max_ack: Option<u32> = None;
        let mut buf = data;

        while buf.remaining() >= HEADER_LEN {
            let header = match SegmentHeader::decode(&mut buf) {
                Some(header) => header,
                None => break,
            };
            if header.conv != self.conv {
                return Err(Error::ConversationMismatch {
                    expected: self.conv,
                    got: header.conv,
                });
            }
            let len = header.len as usize;
            if buf.remaining() < len {
                return Err(Error::PayloadOverrun {
                    declared: len,
                    remaining: buf.remaining(),
                });
            }
            let cmd = match Command::from_byte(header.cmd) {
                Some(cmd) => cmd,
                None => return Err(Error::UnknownCommand(header.cmd)),
            };

            self.rmt_wnd = header.wnd;
            self.trim_acked(header.una);
            self.refresh_snd_una();

            match cmd {
                Command::Ack => {
                    let rtt = wrapping_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.rtt.update(rtt, self.interval);
                    }
                    self.remove_acked(header.sn);
                    self.refresh_snd_una();
                    max_ack = match max_ack {
                        Some(prev) if wrapping_diff(header.sn, prev) <= 0 => Some(prev),
                        _ => Some(header.sn),
                    };
                    self.stats.acks_received += 1;
                    trace!(sn = header.sn, rtt, rto = self.rtt.rto, "input ack");
                    buf.advance(len);
                }
                Command::Push => {
                    trace!(sn = header.sn, ts = header.ts, "input push");
                    let in_window = wrapping_diff(
                        header.sn,
                        self.rcv_nxt.wrapping_add(self.rcv_wnd as u32),
                    ) < 0;
                    if in_window {
                        self.acklist.push((header.sn, header.ts));
                    }
                    if in_window && wrapping_diff(header.sn, self.rcv_nxt) >= 0 {
                        let mut seg = Segment::new(Command::Push, buf.copy_to_bytes(len));
                        seg.conv = header.conv;
                        seg.frg = header.frg;
                        seg.wnd = header.wnd;
                        seg.ts = header.ts;
                        seg.sn = header.sn;
                        seg.una = header.una;
                        if self.insert_rcv_buf(seg) {
                            self.stats.segments_received += 1;
                        }
                    } else {
                        buf.advance(len);
                    }
                }
                Command::WindowAsk => {
                    self.probe |= PROBE_ASK_TELL;
                    trace!("input window probe");
                    buf.advance(len);
                }
                Command::WindowTell => {
                    trace!(wnd = header.wnd, "input window tell");
                    buf.advance(len);
                }
            }
        }

        if let Some(max_ack) = max_ack {
            self.count_skipped_acks(max_ack);
        }

        // Grow the congestion window when this datagram advanced the
        // cumulative ack. The snapshot must predate the segment loop.
        if wrapping_diff(self.snd_una, prev_una) > 0 && self.cwnd < u32::from(self.rmt_wnd) {
            let mss = self.mss as u32;
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr = self.incr.wrapping_add(mss);
            } else {
                if self.incr < mss {
                    self.incr = mss;
                }
                let step = ((u64::from(mss) * u64::from(mss)) / u64::from(self.incr)) as u32
                    + mss / 16;
                self.incr = self.incr.wrapping_add(step);
                if (u64::from(self.cwnd) + 1) * u64::from(mss) <= u64::from(self.incr) {
                    self.cwnd += 1;
                }
            }
            if self.cwnd > u32::from(self.rmt_wnd) {
                self.cwnd = u32::from(self.rmt_wnd);
                self.incr = u32::from(self.rmt_wnd).wrapping_mul(mss);
            }
        }

        Ok(())
    }

    // ─── Scheduling ──────────────────────────────────────────────────────────

    /// Advance the engine clock and flush when the interval is due.
    ///
    /// Call every 10–100 ms, or at the instant [`Engine::check`] suggests.
    /// Clock jumps of ten seconds or more in either direction resnap the
    /// flush clock instead of fast-forwarding through the gap.
    pub fn update(&mut self, now: u32) {
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = wrapping_diff(now, self.ts_flush);
        if slap >= CLOCK_JUMP_LIMIT || slap < -CLOCK_JUMP_LIMIT {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if wrapping_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Earliest timestamp at which [`Engine::update`] next needs to run.
    ///
    /// Returns `now` when a flush or a retransmission is already due, and
    /// never schedules further out than one flush interval.
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        let slap = wrapping_diff(now, ts_flush);
        if slap >= CLOCK_JUMP_LIMIT || slap < -CLOCK_JUMP_LIMIT {
            ts_flush = now;
        }
        if wrapping_diff(now, ts_flush) >= 0 {
            return now;
        }

        let tm_flush = wrapping_diff(ts_flush, now);
        let mut tm_packet = i32::MAX;
        for seg in &self.snd_buf {
            let diff = wrapping_diff(seg.resend_at, now);
            if diff <= 0 {
                return now;
            }
            if diff < tm_packet {
                tm_packet = diff;
            }
        }

        let minimal = (tm_packet.min(tm_flush) as u32).min(self.interval);
        now.wrapping_add(minimal)
    }

    // ─── Flush ───────────────────────────────────────────────────────────────

    /// Emit pending acks, probes, and window-admitted data, then sweep the
    /// send buffer for retransmissions. Invoked by [`Engine::update`].
    fn flush(&mut self) {
        // Never ticked: the peer-facing clock fields are still unanchored.
        if !self.updated {
            return;
        }

        let current = self.current;
        let wnd_unused = self.unused_recv_window();
        let mut template = SegmentHeader {
            conv: self.conv,
            cmd: Command::Ack as u8,
            frg: 0,
            wnd: wnd_unused,
            ts: 0,
            sn: 0,
            una: self.rcv_nxt,
            len: 0,
        };

        // 1. pending acks
        for i in 0..self.acklist.len() {
            let (sn, ts) = self.acklist[i];
            self.stage(HEADER_LEN);
            template.sn = sn;
            template.ts = ts;
            template.encode(&mut self.out_buf);
        }
        self.stats.acks_sent += self.acklist.len() as u64;
        self.acklist.clear();

        // 2. zero-window probe schedule
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if wrapping_diff(current, self.ts_probe) >= 0 {
                if self.probe_wait < PROBE_INIT {
                    self.probe_wait = PROBE_INIT;
                }
                self.probe_wait += self.probe_wait / 2;
                if self.probe_wait > PROBE_LIMIT {
                    self.probe_wait = PROBE_LIMIT;
                }
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe |= PROBE_ASK_SEND;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        // 3. probe commands (sn/ts keep whatever the last ack wrote;
        // receivers ignore both fields for these commands)
        if self.probe & PROBE_ASK_SEND != 0 {
            template.cmd = Command::WindowAsk as u8;
            self.stage(HEADER_LEN);
            template.encode(&mut self.out_buf);
            self.stats.probes_sent += 1;
        }
        if self.probe & PROBE_ASK_TELL != 0 {
            template.cmd = Command::WindowTell as u8;
            self.stage(HEADER_LEN);
            template.encode(&mut self.out_buf);
            self.stats.window_tells_sent += 1;
        }
        self.probe = 0;

        // 4. admit queued segments into the window
        let mut cwnd = u32::from(self.snd_wnd.min(self.rmt_wnd));
        if self.congestion_control {
            cwnd = cwnd.min(self.cwnd);
        }

        while wrapping_diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd)) < 0 {
            let mut seg = match self.snd_queue.pop_front() {
                Some(seg) => seg,
                None => break,
            };
            seg.conv = self.conv;
            seg.cmd = Command::Push;
            seg.wnd = wnd_unused;
            seg.ts = current;
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            seg.una = self.rcv_nxt;
            seg.resend_at = current;
            seg.rto = self.rtt.rto;
            seg.fast_acks = 0;
            seg.xmit = 0;
            self.snd_buf.push_back(seg);
        }

        // 5. resend sweep
        let resent = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        let rtomin = if self.nodelay { 0 } else { self.rtt.rto >> 3 };
        let rto_base = self.rtt.rto;

        let mut lost = false;
        let mut change = 0u32;

        for i in 0..self.snd_buf.len() {
            let mut needsend = false;
            {
                let seg = &mut self.snd_buf[i];
                if seg.xmit == 0 {
                    needsend = true;
                    seg.xmit = 1;
                    seg.rto = rto_base;
                    seg.resend_at = current.wrapping_add(rto_base).wrapping_add(rtomin);
                } else if wrapping_diff(current, seg.resend_at) >= 0 {
                    needsend = true;
                    seg.xmit += 1;
                    seg.rto += if self.nodelay { rto_base / 2 } else { rto_base };
                    seg.resend_at = current.wrapping_add(seg.rto);
                    lost = true;
                    self.stats.timeout_retransmits += 1;
                } else if seg.fast_acks >= resent {
                    needsend = true;
                    seg.xmit += 1;
                    seg.fast_acks = 0;
                    seg.resend_at = current.wrapping_add(seg.rto);
                    change += 1;
                    self.stats.fast_retransmits += 1;
                }
            }

            if needsend {
                let need = self.snd_buf[i].wire_len();
                self.stage(need);

                let rcv_nxt = self.rcv_nxt;
                let seg = &mut self.snd_buf[i];
                seg.ts = current;
                seg.wnd = wnd_unused;
                seg.una = rcv_nxt;
                let (sn, xmit) = (seg.sn, seg.xmit);
                seg.encode_into(&mut self.out_buf);
                self.stats.segments_sent += 1;

                if xmit >= self.dead_link_after && !self.dead_link {
                    self.dead_link = true;
                    warn!(sn, xmit, "dead link: segment exceeded retransmit threshold");
                }
            }
        }

        // 6. trailing partial batch
        self.emit_batch();

        // 7. congestion reaction
        if change > 0 {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.ssthresh = (inflight / 2).max(THRESH_MIN);
            self.cwnd = self.ssthresh + resent;
            self.incr = self.cwnd.wrapping_mul(self.mss as u32);
        }
        if lost {
            self.ssthresh = (cwnd / 2).max(THRESH_MIN);
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// Free receive-window slots to advertise.
    fn unused_recv_window(&self) -> u16 {
        let queued = self.rcv_queue.len();
        if queued < self.rcv_wnd as usize {
            self.rcv_wnd - queued as u16
        } else {
            0
        }
    }

    /// Hand the batch to the output hook if `need` more bytes would not fit.
    fn stage(&mut self, need: usize) {
        if self.out_buf.len() + need > self.mtu {
            self.emit_batch();
        }
    }

    fn emit_batch(&mut self) {
        if self.out_buf.is_empty() {
            return;
        }
        trace!(len = self.out_buf.len(), "output datagram");
        self.output.transmit(&self.out_buf);
        self.stats.datagrams_output += 1;
        self.out_buf.clear();
    }

    /// Drop every in-flight segment the cumulative ack covers.
    fn trim_acked(&mut self, una: u32) {
        while let Some(seg) = self.snd_buf.front() {
            if wrapping_diff(una, seg.sn) > 0 {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    /// Recompute `snd_una` from the send-buffer head.
    fn refresh_snd_una(&mut self) {
        self.snd_una = match self.snd_buf.front() {
            Some(seg) => seg.sn,
            None => self.snd_nxt,
        };
    }

    /// Remove the one segment a selective ack names.
    fn remove_acked(&mut self, sn: u32) {
        if wrapping_diff(sn, self.snd_una) < 0 || wrapping_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for i in 0..self.snd_buf.len() {
            let seg_sn = self.snd_buf[i].sn;
            if sn == seg_sn {
                let _ = self.snd_buf.remove(i);
                break;
            }
            if wrapping_diff(sn, seg_sn) < 0 {
                break;
            }
        }
    }

    /// Bump the duplicate-ack counter of every segment the highest ack in a
    /// datagram skipped over.
    fn count_skipped_acks(&mut self, sn: u32) {
        if wrapping_diff(sn, self.snd_una) < 0 || wrapping_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for seg in &mut self.snd_buf {
            if wrapping_diff(sn, seg.sn) < 0 {
                break;
            }
            if sn != seg.sn {
                seg.fast_acks += 1;
            }
        }
    }

    /// Place an in-window data segment into the receive buffer, keeping it
    /// ordered and duplicate-free, then promote whatever became contiguous.
    /// Returns false when the segment was a duplicate.
    fn insert_rcv_buf(&mut self, seg: Segment) -> bool {
        let sn = seg.sn;
        let mut insert_at = 0;
        let mut repeat = false;
        for (i, existing) in self.rcv_buf.iter().enumerate().rev() {
            if existing.sn == sn {
                repeat = true;
                break;
            }
            if wrapping_diff(sn, existing.sn) > 0 {
                insert_at = i + 1;
                break;
            }
        }

        let inserted = if repeat {
            false
        } else {
            self.rcv_buf.insert(insert_at, seg);
            true
        };
        self.promote_rcv_buf();
        inserted
    }

    /// Move contiguous segments from the receive buffer to the receive queue
    /// while queue capacity allows.
    fn promote_rcv_buf(&mut self) {
        loop {
            let ready = match self.rcv_buf.front() {
                Some(seg) => {
                    seg.sn == self.rcv_nxt && self.rcv_queue.len() < self.rcv_wnd as usize
                }
                None => false,
            };
            if !ready {
                break;
            }
            if let Some(seg) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Sink = Rc<RefCell<Vec<Vec<u8>>>>;

    fn collector() -> (Sink, impl FnMut(&[u8])) {
        let store: Sink = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&store);
        (store, move |d: &[u8]| sink.borrow_mut().push(d.to_vec()))
    }

    fn decode_segments(datagram: &[u8]) -> Vec<SegmentHeader> {
        let mut buf = datagram;
        let mut headers = Vec::new();
        while let Some(header) = SegmentHeader::decode(&mut buf) {
            buf.advance(header.len as usize);
            headers.push(header);
        }
        headers
    }

    fn ack_datagram(conv: u32, sn: u32, ts: u32, una: u32, wnd: u16) -> Vec<u8> {
        let header = SegmentHeader {
            conv,
            cmd: Command::Ack as u8,
            frg: 0,
            wnd,
            ts,
            sn,
            una,
            len: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.to_vec()
    }

    fn push_datagram(conv: u32, sn: u32, frg: u8, payload: &[u8]) -> Vec<u8> {
        let header = SegmentHeader {
            conv,
            cmd: Command::Push as u8,
            frg,
            wnd: 32,
            ts: 0,
            sn,
            una: 0,
            len: payload.len() as u32,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    // ─── RTT estimator ────────────────────────────────────────────────────

    #[test]
    fn rtt_first_sample_seeds_filter() {
        let mut rtt = RttEstimator::new();
        rtt.update(100, 100);
        assert_eq!(rtt.srtt, 100);
        assert_eq!(rtt.rttval, 50);
        // 100 + max(100, 4*50) = 300
        assert_eq!(rtt.rto, 300);
    }

    #[test]
    fn rtt_smoothing_uses_fixed_weights() {
        let mut rtt = RttEstimator::new();
        rtt.update(100, 100);
        rtt.update(50, 100);
        // delta = 50; rttval = (3*50 + 50)/4 = 50; srtt = (7*100 + 50)/8 = 93
        assert_eq!(rtt.rttval, 50);
        assert_eq!(rtt.srtt, 93);
        assert_eq!(rtt.rto, 93 + 200);
    }

    #[test]
    fn rtt_rto_respects_floor_and_ceiling() {
        let mut rtt = RttEstimator::new();
        rtt.update(1, 10);
        assert_eq!(rtt.rto, RTO_MIN);

        let mut slow = RttEstimator::new();
        slow.update(100_000, 100);
        assert_eq!(slow.rto, RTO_MAX);
    }

    #[test]
    fn rtt_absurd_sample_is_capped() {
        let mut rtt = RttEstimator::new();
        rtt.update(i32::MAX, 100);
        assert_eq!(rtt.srtt, RTO_MAX as i32);
        assert_eq!(rtt.rto, RTO_MAX);

        // the filter stays well-behaved on the next sane sample
        rtt.update(50, 100);
        assert!(rtt.srtt < RTO_MAX as i32);
        assert!(rtt.rto <= RTO_MAX);
    }

    #[test]
    fn rtt_floor_follows_nodelay_setting() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_nodelay(true);
        assert_eq!(eng.rtt.min_rto, RTO_NDL);
        eng.set_nodelay(false);
        assert_eq!(eng.rtt.min_rto, RTO_MIN);
        eng.set_min_rto(10);
        assert_eq!(eng.rtt.min_rto, 10);
    }

    #[test]
    fn rtt_floor_above_ceiling_pins_rto_at_max() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_min_rto(70_000);
        eng.update(100);

        // a valid ack must survive the inverted floor/ceiling pair
        eng.input(&ack_datagram(1, 0, 50, 0, 32)).unwrap();
        assert_eq!(eng.rtt.rto, RTO_MAX);
    }

    // ─── Fragmentation ────────────────────────────────────────────────────

    #[test]
    fn send_fragments_count_down_to_zero() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_mtu(74).unwrap(); // mss = 50

        eng.send(&[7u8; 120]).unwrap();
        assert_eq!(eng.snd_queue.len(), 3);
        let frgs: Vec<u8> = eng.snd_queue.iter().map(|s| s.frg).collect();
        assert_eq!(frgs, vec![2, 1, 0]);
        let lens: Vec<usize> = eng.snd_queue.iter().map(|s| s.payload.len()).collect();
        assert_eq!(lens, vec![50, 50, 20]);
    }

    #[test]
    fn send_accepts_exactly_255_fragments_and_rejects_more() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_mtu(74).unwrap(); // mss = 50

        let max = vec![0u8; 255 * 50];
        eng.send(&max).unwrap();
        assert_eq!(eng.snd_queue.len(), 255);
        // the index field tops out one below the fragment count
        assert_eq!(eng.snd_queue.front().map(|s| s.frg), Some(254));

        let too_big = vec![0u8; 255 * 50 + 1];
        assert_eq!(
            eng.send(&too_big),
            Err(Error::MessageTooLarge { fragments: 256 })
        );
    }

    #[test]
    fn send_empty_payload_queues_one_segment() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.send(&[]).unwrap();
        assert_eq!(eng.snd_queue.len(), 1);
        assert_eq!(eng.snd_queue[0].payload.len(), 0);
        assert_eq!(eng.snd_queue[0].frg, 0);
        assert_eq!(eng.pending_send_count(), 1);
    }

    // ─── Window admission ─────────────────────────────────────────────────

    #[test]
    fn first_flush_admits_nothing_until_cwnd_opens() {
        let (sent, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.send(b"hello").unwrap();

        eng.update(0);
        assert!(eng.snd_buf.is_empty());
        assert!(sent.borrow().is_empty());
        assert_eq!(eng.cwnd, 1);

        eng.update(200);
        assert_eq!(eng.snd_buf.len(), 1);
        assert_eq!(eng.snd_buf[0].sn, 0);
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn disabled_congestion_control_admits_on_first_flush() {
        let (sent, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        eng.send(b"a").unwrap();
        eng.send(b"b").unwrap();

        eng.update(0);
        assert_eq!(eng.snd_buf.len(), 2);
        let headers = decode_segments(&sent.borrow()[0]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].sn, 0);
        assert_eq!(headers[1].sn, 1);
    }

    #[test]
    fn snd_buf_sequence_numbers_strictly_increase() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        for _ in 0..10 {
            eng.send(b"x").unwrap();
        }
        eng.update(0);

        for pair in eng.snd_buf.iter().collect::<Vec<_>>().windows(2) {
            assert!(wrapping_diff(pair[1].sn, pair[0].sn) > 0);
        }
        assert!(wrapping_diff(eng.snd_nxt, eng.snd_una) >= 0);
    }

    // ─── Input validation ─────────────────────────────────────────────────

    #[test]
    fn input_rejects_short_datagrams() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        assert_eq!(eng.input(&[0u8; 23]), Err(Error::DatagramTooShort));
        assert_eq!(eng.input(&[]), Err(Error::DatagramTooShort));
    }

    #[test]
    fn input_rejects_conversation_mismatch() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let datagram = push_datagram(2, 0, 0, b"x");
        assert_eq!(
            eng.input(&datagram),
            Err(Error::ConversationMismatch { expected: 1, got: 2 })
        );
        assert!(eng.rcv_buf.is_empty());
        assert!(eng.acklist.is_empty());
    }

    #[test]
    fn input_rejects_unknown_command() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let mut datagram = push_datagram(1, 0, 0, b"");
        datagram[4] = 99;
        assert_eq!(eng.input(&datagram), Err(Error::UnknownCommand(99)));
    }

    #[test]
    fn input_rejects_payload_overrun() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let mut datagram = push_datagram(1, 0, 0, b"abc");
        datagram.truncate(HEADER_LEN + 1);
        assert_eq!(
            eng.input(&datagram),
            Err(Error::PayloadOverrun {
                declared: 3,
                remaining: 1
            })
        );
    }

    #[test]
    fn input_keeps_effects_of_segments_before_the_bad_one() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let mut datagram = push_datagram(1, 0, 0, b"ok");
        datagram.extend_from_slice(&push_datagram(2, 1, 0, b"no"));
        assert_eq!(
            eng.input(&datagram),
            Err(Error::ConversationMismatch { expected: 1, got: 2 })
        );
        // first segment landed
        assert_eq!(eng.rcv_queue.len(), 1);
        assert_eq!(eng.acklist.len(), 1);
    }

    #[test]
    fn input_ignores_trailing_runt_after_full_segment() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let mut datagram = push_datagram(1, 0, 0, b"ok");
        datagram.extend_from_slice(&[0u8; 5]);
        assert_eq!(eng.input(&datagram), Ok(()));
        assert_eq!(eng.rcv_queue.len(), 1);
    }

    // ─── Receive path ─────────────────────────────────────────────────────

    #[test]
    fn duplicate_push_is_reacked_but_not_requeued() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let datagram = push_datagram(1, 0, 0, b"data");

        eng.input(&datagram).unwrap();
        eng.input(&datagram).unwrap();

        // both deliveries earn an ack entry, data lands once
        assert_eq!(eng.acklist.len(), 2);
        assert_eq!(eng.rcv_queue.len(), 1);
        assert!(eng.rcv_buf.is_empty());
        assert_eq!(eng.stats().segments_received, 1);
    }

    #[test]
    fn out_of_order_segments_reassemble_in_order() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.input(&push_datagram(1, 2, 0, b"C")).unwrap();
        eng.input(&push_datagram(1, 1, 1, b"B")).unwrap();
        eng.input(&push_datagram(1, 0, 2, b"A")).unwrap();

        assert_eq!(eng.peek_size(), Some(3));
        let mut buf = [0u8; 16];
        let n = eng.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ABC");
        assert_eq!(eng.rcv_nxt, 3);
    }

    #[test]
    fn peek_size_reports_not_ready_until_chain_completes() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.input(&push_datagram(1, 0, 1, b"first")).unwrap();
        assert_eq!(eng.peek_size(), None);
        let mut buf = [0u8; 16];
        assert_eq!(eng.recv(&mut buf), Err(Error::NoMessageReady));

        eng.input(&push_datagram(1, 1, 0, b"rest")).unwrap();
        assert_eq!(eng.peek_size(), Some(9));
    }

    #[test]
    fn recv_rejects_undersized_buffer() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.input(&push_datagram(1, 0, 0, b"a big message")).unwrap();
        let mut tiny = [0u8; 4];
        assert_eq!(
            eng.recv(&mut tiny),
            Err(Error::BufferTooSmall { needed: 13 })
        );
        // message still there
        let mut big = [0u8; 32];
        assert_eq!(eng.recv(&mut big), Ok(13));
    }

    #[test]
    fn push_outside_window_is_dropped_without_ack() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        let far = u32::from(eng.rcv_wnd) + 10;
        eng.input(&push_datagram(1, far, 0, b"late")).unwrap();
        assert!(eng.acklist.is_empty());
        assert!(eng.rcv_buf.is_empty());
    }

    #[test]
    fn recv_reopening_window_schedules_tell() {
        let (sent, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_window_size(0, 2);
        eng.input(&push_datagram(1, 0, 0, b"a")).unwrap();
        eng.input(&push_datagram(1, 1, 0, b"b")).unwrap();
        assert_eq!(eng.rcv_queue.len(), 2);

        let mut buf = [0u8; 8];
        eng.recv(&mut buf).unwrap();
        assert_eq!(eng.probe & PROBE_ASK_TELL, PROBE_ASK_TELL);

        eng.update(0);
        let datagrams = sent.borrow();
        let headers: Vec<SegmentHeader> =
            datagrams.iter().flat_map(|d| decode_segments(d)).collect();
        assert!(headers
            .iter()
            .any(|h| h.cmd == Command::WindowTell as u8));
    }

    // ─── Ack processing ───────────────────────────────────────────────────

    #[test]
    fn cumulative_ack_trims_send_buffer() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        for _ in 0..4 {
            eng.send(b"m").unwrap();
        }
        eng.update(0);
        assert_eq!(eng.snd_buf.len(), 4);

        eng.input(&ack_datagram(1, 2, 0, 2, 32)).unwrap();
        // una=2 trims sn 0 and 1; the selective ack removes sn 2
        assert_eq!(eng.snd_buf.len(), 1);
        assert_eq!(eng.snd_buf[0].sn, 3);
        assert_eq!(eng.snd_una, 3);
    }

    #[test]
    fn ack_for_unsent_sequence_is_ignored() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        eng.send(b"m").unwrap();
        eng.update(0);

        eng.input(&ack_datagram(1, 40, 0, 0, 32)).unwrap();
        assert_eq!(eng.snd_buf.len(), 1);
        assert_eq!(eng.snd_una, 0);
    }

    #[test]
    fn skipped_acks_bump_fast_ack_counters() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        for _ in 0..3 {
            eng.send(b"m").unwrap();
        }
        eng.update(0);

        eng.input(&ack_datagram(1, 2, 0, 0, 32)).unwrap();
        assert_eq!(eng.snd_buf[0].fast_acks, 1); // sn 0
        assert_eq!(eng.snd_buf[1].fast_acks, 1); // sn 1
        assert_eq!(eng.snd_buf.len(), 2);
    }

    #[test]
    fn ack_advancing_una_grows_cwnd() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.send(b"m").unwrap();
        eng.update(0);
        eng.update(200); // admits sn 0 once cwnd reached 1
        assert_eq!(eng.cwnd, 1);

        eng.input(&ack_datagram(1, 0, 200, 1, 32)).unwrap();
        assert_eq!(eng.snd_una, 1);
        assert_eq!(eng.cwnd, 2); // slow start: +1 per advancing datagram
    }

    // ─── Congestion reaction ──────────────────────────────────────────────

    #[test]
    fn timeout_collapses_congestion_window() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.send(b"m").unwrap();
        eng.update(0);
        eng.update(200);
        assert_eq!(eng.snd_buf[0].xmit, 1);
        let first_rto = eng.snd_buf[0].rto;

        // rto 200 + rtomin 25 puts the deadline at 425; jump past it
        eng.update(1_000);
        assert_eq!(eng.snd_buf[0].xmit, 2);
        assert_eq!(eng.snd_buf[0].rto, first_rto + eng.rtt.rto);
        assert_eq!(eng.cwnd, 1);
        assert_eq!(eng.ssthresh, THRESH_MIN);
        assert_eq!(eng.stats().timeout_retransmits, 1);
    }

    #[test]
    fn fast_retransmit_halves_inflight_without_collapse() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        eng.set_fast_resend(2);
        for _ in 0..6 {
            eng.send(b"m").unwrap();
        }
        eng.update(0);
        assert_eq!(eng.snd_buf.len(), 6);

        // two acks skipping sn 0
        eng.input(&ack_datagram(1, 1, 0, 0, 32)).unwrap();
        eng.input(&ack_datagram(1, 2, 0, 0, 32)).unwrap();
        assert_eq!(eng.snd_buf[0].fast_acks, 2);

        eng.update(INTERVAL);
        assert_eq!(eng.stats().fast_retransmits, 1);
        assert_eq!(eng.snd_buf[0].fast_acks, 0);
        // inflight = 6, ssthresh = 3, cwnd = ssthresh + resent
        assert_eq!(eng.ssthresh, 3);
        assert_eq!(eng.cwnd, 5);
    }

    #[test]
    fn dead_link_flag_sets_after_threshold_transmissions() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_dead_link(3);
        eng.set_congestion_control(false);
        eng.send(b"m").unwrap();

        let mut now = 0;
        eng.update(now);
        assert!(!eng.is_dead_link());
        for _ in 0..3 {
            now += 5_000;
            eng.update(now);
        }
        assert!(eng.is_dead_link());
        assert!(eng.snd_buf[0].xmit >= 3);
    }

    // ─── Zero-window probing ──────────────────────────────────────────────

    #[test]
    fn zero_remote_window_arms_then_fires_probe() {
        let (sent, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.rmt_wnd = 0;

        eng.update(0);
        assert_eq!(eng.probe_wait, PROBE_INIT);
        assert_eq!(eng.ts_probe, PROBE_INIT);
        assert_eq!(eng.stats().probes_sent, 0);

        eng.update(PROBE_INIT + 10);
        assert_eq!(eng.stats().probes_sent, 1);
        assert_eq!(eng.probe_wait, PROBE_INIT + PROBE_INIT / 2);

        let datagrams = sent.borrow();
        let headers: Vec<SegmentHeader> =
            datagrams.iter().flat_map(|d| decode_segments(d)).collect();
        assert!(headers.iter().any(|h| h.cmd == Command::WindowAsk as u8));
    }

    #[test]
    fn probe_backoff_never_exceeds_limit() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.rmt_wnd = 0;

        let mut now = 0u32;
        eng.update(now);
        for _ in 0..40 {
            now = eng.ts_probe.wrapping_add(1);
            eng.update(now);
            assert!(eng.probe_wait <= PROBE_LIMIT);
        }
        assert_eq!(eng.probe_wait, PROBE_LIMIT);

        eng.rmt_wnd = 32;
        eng.update(now.wrapping_add(INTERVAL));
        assert_eq!(eng.probe_wait, 0);
        assert_eq!(eng.ts_probe, 0);
    }

    // ─── Scheduling ───────────────────────────────────────────────────────

    #[test]
    fn check_before_first_update_returns_now() {
        let (_, out) = collector();
        let eng = Engine::new(1, out);
        assert_eq!(eng.check(1234), 1234);
    }

    #[test]
    fn check_caps_at_one_interval() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.update(0);
        assert_eq!(eng.check(0), INTERVAL);
        // halfway to the flush
        assert_eq!(eng.check(40), 100);
    }

    #[test]
    fn check_tracks_nearest_resend_deadline() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        eng.send(b"m").unwrap();
        eng.update(0);

        eng.snd_buf[0].resend_at = 30;
        assert_eq!(eng.check(0), 30);

        eng.snd_buf[0].resend_at = 0;
        assert_eq!(eng.check(5), 5);
    }

    #[test]
    fn update_resnaps_after_clock_jump() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.update(0);
        eng.update(50_000);
        assert_eq!(eng.ts_flush, 50_000 + INTERVAL);
        // and keeps flushing normally afterwards
        eng.update(50_000 + INTERVAL);
        assert_eq!(eng.ts_flush, 50_000 + 2 * INTERVAL);
    }

    // ─── Sequence wraparound ──────────────────────────────────────────────

    #[test]
    fn wrapping_diff_is_signed_across_the_boundary() {
        assert_eq!(wrapping_diff(1, u32::MAX), 2);
        assert_eq!(wrapping_diff(u32::MAX, 1), -2);
        assert_eq!(wrapping_diff(5, 5), 0);
    }

    #[test]
    fn cumulative_ack_trims_across_sequence_wrap() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.set_congestion_control(false);
        eng.snd_una = u32::MAX - 1;
        eng.snd_nxt = u32::MAX - 1;
        for _ in 0..4 {
            eng.send(b"m").unwrap();
        }
        eng.update(0);
        let sns: Vec<u32> = eng.snd_buf.iter().map(|s| s.sn).collect();
        assert_eq!(sns, vec![u32::MAX - 1, u32::MAX, 0, 1]);

        eng.input(&ack_datagram(1, 0, 0, 1, 32)).unwrap();
        assert_eq!(eng.snd_buf.len(), 1);
        assert_eq!(eng.snd_buf[0].sn, 1);
        assert_eq!(eng.snd_una, 1);
    }

    #[test]
    fn receive_side_promotes_across_sequence_wrap() {
        let (_, out) = collector();
        let mut eng = Engine::new(1, out);
        eng.rcv_nxt = u32::MAX;
        eng.input(&push_datagram(1, 0, 0, b"b")).unwrap();
        eng.input(&push_datagram(1, u32::MAX, 1, b"a")).unwrap();

        assert_eq!(eng.rcv_nxt, 1);
        let mut buf = [0u8; 8];
        let n = eng.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ab");
    }
}
