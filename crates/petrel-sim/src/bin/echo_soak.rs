//! Command-line echo soak runner.
//!
//! Drives one [`EchoScenario`] with parameters from the command line and
//! prints a JSON summary, so link tunings can be compared without editing
//! test code:
//!
//! ```text
//! echo_soak --tuning turbo --loss 10 --rtt 60:125 --messages 1000 --seed 7
//! ```
//!
//! Exits nonzero when the run misses the budget or delivers out of order.

use petrel_sim::scenario::{EchoConfig, EchoScenario, Tuning};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let mut cfg = EchoConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tuning" => {
                let value = args.next().expect("Missing --tuning value");
                cfg.tuning = match value.as_str() {
                    "default" => Tuning::Default,
                    "no-congestion" => Tuning::NoCongestion,
                    "turbo" => Tuning::Turbo,
                    other => panic!("Unknown tuning: {other} (default|no-congestion|turbo)"),
                };
            }
            "--seed" => {
                cfg.link.seed = args
                    .next()
                    .expect("Missing --seed value")
                    .parse()
                    .expect("--seed must be an integer");
            }
            "--loss" => {
                cfg.link.loss_percent = args
                    .next()
                    .expect("Missing --loss value")
                    .parse()
                    .expect("--loss must be a percentage");
            }
            "--rtt" => {
                // Format: MIN:MAX in milliseconds, full path
                let value = args.next().expect("Missing --rtt value");
                let (min, max) = value.split_once(':').expect("--rtt must be MIN:MAX");
                cfg.link.rtt_min_ms = min.parse().expect("--rtt minimum must be an integer");
                cfg.link.rtt_max_ms = max.parse().expect("--rtt maximum must be an integer");
            }
            "--messages" => {
                cfg.messages = args
                    .next()
                    .expect("Missing --messages value")
                    .parse()
                    .expect("--messages must be an integer");
            }
            "--every" => {
                cfg.send_every_ms = args
                    .next()
                    .expect("Missing --every value")
                    .parse()
                    .expect("--every must be milliseconds");
            }
            "--budget" => {
                cfg.budget_ms = args
                    .next()
                    .expect("Missing --budget value")
                    .parse()
                    .expect("--budget must be milliseconds");
            }
            _ => {}
        }
    }

    eprintln!(
        "Echo soak: {:?}, {} msgs every {} ms, {}% loss, {}..{} ms rtt, seed {}",
        cfg.tuning,
        cfg.messages,
        cfg.send_every_ms,
        cfg.link.loss_percent,
        cfg.link.rtt_min_ms,
        cfg.link.rtt_max_ms,
        cfg.link.seed,
    );

    let outcome = EchoScenario::new(cfg).run();

    let summary = serde_json::json!({
        "completed_at_ms": outcome.completed_at,
        "received": outcome.received,
        "out_of_order": outcome.out_of_order,
        "avg_rtt_ms": outcome.avg_rtt_ms,
        "max_rtt_ms": outcome.max_rtt_ms,
        "link_lost_datagrams": outcome.lost_datagrams,
        "dead_link": outcome.dead_link,
        "client": outcome.client,
        "server": outcome.server,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("summary serializes")
    );

    if outcome.completed_at.is_none() || outcome.out_of_order > 0 || outcome.dead_link {
        tracing::error!("echo soak failed");
        std::process::exit(1);
    }
}
