#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_pollable::{encode_gauge, MeterId, StatsdFlavor};

// Fuzz target focusing on edge cases in metric names
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Convert bytes to string (testing various encodings)
    let metric_name = String::from_utf8_lossy(data);
    let id = MeterId::new(metric_name.as_ref());

    for flavor in [StatsdFlavor::Datadog, StatsdFlavor::Etsy, StatsdFlavor::Telegraf] {
        let line = encode_gauge(flavor, &id, 42.0);
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert!(line.ends_with(":42|g"));
    }
});
