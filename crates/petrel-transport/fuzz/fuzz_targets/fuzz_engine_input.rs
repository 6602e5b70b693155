#![no_main]

use libfuzzer_sys::fuzz_target;
use petrel_transport::engine::Engine;

/// Fuzz the full input path of the engine.
///
/// This target exercises:
/// - datagram parsing inside Engine::input (header walk, payload bounds)
/// - ack/una processing against an empty and a non-empty send buffer
/// - receive-buffer insertion, duplicate suppression, promotion
/// - flush scheduling through update/check after arbitrary input
///
/// The engine must never panic, whatever the wire carries; malformed
/// datagrams surface as errors.
fuzz_target!(|data: &[u8]| {
    // Take the conversation id from the input so generated headers can pass
    // the conv gate and reach the deeper state machinery.
    let conv = if data.len() >= 4 {
        u32::from_le_bytes([data[0], data[1], data[2], data[3]])
    } else {
        0
    };

    let mut engine = Engine::new(conv, |_: &[u8]| {});
    engine.set_congestion_control(false);
    let _ = engine.send(b"in flight");
    engine.update(0);

    let _ = engine.input(data);
    engine.update(100);
    let _ = engine.check(100);

    let mut buf = [0u8; 4096];
    while engine.peek_size().is_some_and(|n| n <= buf.len()) {
        if engine.recv(&mut buf).is_err() {
            break;
        }
    }

    // split delivery exercises cross-datagram state (fast-ack counting,
    // window shrink, re-acking)
    if data.len() >= 48 {
        let mut engine = Engine::new(conv, |_: &[u8]| {});
        let mid = data.len() / 2;
        let _ = engine.input(&data[..mid]);
        let _ = engine.input(&data[mid..]);
        engine.update(50);
        let _ = engine.check(60);
    }
});
