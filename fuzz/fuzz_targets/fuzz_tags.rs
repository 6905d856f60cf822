#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_pollable::{encode_gauge, MeterId, StatsdFlavor};

// Fuzz target focusing on edge cases in tags
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Split the data into chunks to create multiple key/value pairs
    let mut tags: Vec<(String, String)> = Vec::new();
    let chunk_size = if data.len() > 10 { data.len() / 10 } else { 1 };

    for pair in data.chunks(chunk_size).collect::<Vec<_>>().chunks(2) {
        let key = String::from_utf8_lossy(pair[0]).to_string();
        let value = pair
            .get(1)
            .map(|v| String::from_utf8_lossy(v).to_string())
            .unwrap_or_default();
        tags.push((key, value));
    }

    let id = MeterId::new("fuzz.gauge").with_tags(tags);

    for flavor in [StatsdFlavor::Datadog, StatsdFlavor::Etsy, StatsdFlavor::Telegraf] {
        let line = encode_gauge(flavor, &id, 1.5);
        assert!(!line.contains('\n'));
        assert!(line.contains("|g"));
    }
});
