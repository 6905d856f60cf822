#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_pollable::{encode_gauge, MeterId, StatsdFlavor};

// Fuzz target focusing on numeric edge cases
fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let value = f64::from_bits(u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ]));
    let id = MeterId::new("fuzz.gauge").with_tag("fuzz", "test");

    let line = encode_gauge(StatsdFlavor::Datadog, &id, value);
    assert!(!line.contains('\n'));
    assert!(line.contains("|g"));

    // every finite value survives the text form
    if value.is_finite() {
        let text = &line["fuzz.gauge:".len()..line.find("|g").unwrap()];
        let parsed: f64 = text.parse().unwrap();
        assert_eq!(parsed, value);
    }
});
