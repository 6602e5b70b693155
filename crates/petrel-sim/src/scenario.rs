//! Deterministic echo scenario: two engines across a [`SimLink`].
//!
//! A client sends numbered 8-byte messages on a fixed cadence; the server
//! echoes every message straight back; the client records round-trip times
//! and checks arrival order. Time is virtual (one loop iteration per
//! millisecond) and the link is seeded, so a given [`EchoConfig`] always
//! produces the same [`EchoOutcome`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use petrel_transport::engine::Engine;
use petrel_transport::stats::EngineStats;

use crate::link::{LinkConfig, Side, SimLink};

const CONV: u32 = 0x1122_3344;

/// Engine parameter profile for one echo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tuning {
    /// Stock retransmission behavior with the congestion window on.
    Default,
    /// Stock retransmission behavior, congestion window off.
    NoCongestion,
    /// Low-latency profile: no-delay RTO growth, fast retransmit after two
    /// duplicate acks (one on the client), 10 ms RTO floor on the client.
    Turbo,
}

/// Knobs for a single echo run.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    pub tuning: Tuning,
    /// Messages the client sends before going quiet.
    pub messages: u32,
    /// Client send cadence in virtual milliseconds.
    pub send_every_ms: u32,
    /// Virtual-time cap; a run that has not completed by then is reported
    /// with `completed_at: None`.
    pub budget_ms: u32,
    pub link: LinkConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        EchoConfig {
            tuning: Tuning::Default,
            messages: 1_000,
            send_every_ms: 20,
            budget_ms: 600_000,
            link: LinkConfig::default(),
        }
    }
}

/// Aggregates from one echo run.
#[derive(Debug, Clone)]
pub struct EchoOutcome {
    /// Virtual time at which the final echo arrived, if the run finished.
    pub completed_at: Option<u32>,
    /// Echo replies the client received.
    pub received: u32,
    /// Replies whose sequence number did not match the arrival position.
    /// The transport promises ordered delivery, so anything above zero is
    /// an engine defect.
    pub out_of_order: u32,
    /// Mean round trip over all replies, send-queue sojourn included.
    pub avg_rtt_ms: u32,
    pub max_rtt_ms: u32,
    pub client: EngineStats,
    pub server: EngineStats,
    /// Datagrams the link dropped, both directions combined.
    pub lost_datagrams: u64,
    /// True when either engine flagged its peer unreachable.
    pub dead_link: bool,
}

type SharedLink = Rc<RefCell<SimLink>>;
type SharedClock = Rc<Cell<u32>>;

fn wired_engine(side: Side, link: &SharedLink, clock: &SharedClock) -> Engine<impl FnMut(&[u8])> {
    let link = Rc::clone(link);
    let clock = Rc::clone(clock);
    Engine::new(CONV, move |datagram: &[u8]| {
        link.borrow_mut().send(side, datagram, clock.get());
    })
}

fn apply_tuning(engine: &mut Engine<impl FnMut(&[u8])>, tuning: Tuning) {
    engine.set_window_size(128, 128);
    engine.set_interval(10);
    match tuning {
        Tuning::Default => {}
        Tuning::NoCongestion => {
            engine.set_congestion_control(false);
        }
        Tuning::Turbo => {
            engine.set_nodelay(true);
            engine.set_fast_resend(2);
            engine.set_congestion_control(false);
        }
    }
}

/// One-shot echo runner.
#[derive(Debug, Clone)]
pub struct EchoScenario {
    cfg: EchoConfig,
}

impl EchoScenario {
    pub fn new(cfg: EchoConfig) -> Self {
        Self { cfg }
    }

    /// Drive the run to completion or to the virtual-time budget.
    pub fn run(&self) -> EchoOutcome {
        let link: SharedLink = Rc::new(RefCell::new(SimLink::new(self.cfg.link.clone())));
        let clock: SharedClock = Rc::new(Cell::new(0));

        let mut client = wired_engine(Side::A, &link, &clock);
        let mut server = wired_engine(Side::B, &link, &clock);
        apply_tuning(&mut client, self.cfg.tuning);
        apply_tuning(&mut server, self.cfg.tuning);
        if let Tuning::Turbo = self.cfg.tuning {
            // the sending side chases losses harder; the echo side stays stock
            client.set_fast_resend(1);
            client.set_min_rto(10);
        }

        let mut next_send = 0u32;
        let mut sent = 0u32;
        let mut received = 0u32;
        let mut out_of_order = 0u32;
        let mut sum_rtt = 0u64;
        let mut max_rtt = 0u32;
        let mut completed_at = None;
        let mut buf = [0u8; 64];

        for now in 0..self.cfg.budget_ms {
            clock.set(now);
            client.update(now);
            server.update(now);

            while let Some(datagram) = link.borrow_mut().recv(Side::B, now) {
                server.input(&datagram).expect("peer datagrams are well-formed");
            }
            while let Some(datagram) = link.borrow_mut().recv(Side::A, now) {
                client.input(&datagram).expect("peer datagrams are well-formed");
            }

            while let Ok(n) = server.recv(&mut buf) {
                server.send(&buf[..n]).expect("echo payload fits one fragment");
            }

            while let Ok(n) = client.recv(&mut buf) {
                debug_assert_eq!(n, 8, "client only ever sends 8-byte messages");
                let sn = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                let ts = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
                if sn != received {
                    out_of_order += 1;
                }
                received += 1;

                let rtt = now.wrapping_sub(ts);
                sum_rtt += u64::from(rtt);
                max_rtt = max_rtt.max(rtt);
            }

            if received == self.cfg.messages {
                completed_at = Some(now);
                break;
            }

            if now >= next_send && sent < self.cfg.messages {
                let mut msg = [0u8; 8];
                msg[..4].copy_from_slice(&sent.to_le_bytes());
                msg[4..].copy_from_slice(&now.to_le_bytes());
                client.send(&msg).expect("echo payload fits one fragment");
                sent += 1;
                next_send = now + self.cfg.send_every_ms;
            }
        }

        let lost = {
            let link = link.borrow();
            link.stats(Side::A).lost + link.stats(Side::B).lost
        };
        EchoOutcome {
            completed_at,
            received,
            out_of_order,
            avg_rtt_ms: if received > 0 {
                (sum_rtt / u64::from(received)) as u32
            } else {
                0
            },
            max_rtt_ms: max_rtt,
            client: *client.stats(),
            server: *server.stats(),
            lost_datagrams: lost,
            dead_link: client.is_dead_link() || server.is_dead_link(),
        }
    }
}
