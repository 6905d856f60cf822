//! Gauge examples: objects sampled on a schedule, published only on change.
//!
//! Run with: `cargo run --example gauges`

use statsd_pollable::{
    meter_id, GaugeRegistry, GaugeRegistryOptions, LineWriterType, MeterId, StatsdFlavor,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn main() {
    let options = GaugeRegistryOptions {
        flavor: StatsdFlavor::Datadog,
        prefix: "myapp.".to_string(),
        common_tags: vec![("env".to_string(), "demo".to_string())],
        poll_interval: Some(Duration::from_millis(100)),
        writer_type: LineWriterType::Simple,
        ..GaugeRegistryOptions::default()
    };

    let bind_addr = "0.0.0.0:0".parse().unwrap();
    let statsd_addr = "127.0.0.1:8125".parse().unwrap();
    let registry = GaugeRegistry::new(bind_addr, statsd_addr, options).unwrap();

    // --- Builder API ---

    let connections = Arc::new(AtomicUsize::new(42));
    registry.gauge(
        MeterId::new("connections.active").with_tag("pool", "main"),
        &connections,
        |c| c.load(Ordering::Relaxed) as f64,
    );

    // --- Macro ---

    let queue = Arc::new(Mutex::new(VecDeque::from(vec![1, 2, 3])));
    let queue_gauge = registry.gauge(
        meter_id!("queue.depth", "queue" => "jobs", "priority" => "high"),
        &queue,
        |q| q.lock().map_or(0.0, |q| q.len() as f64),
    );

    // Gauge without tags; only the first poll publishes while the value holds
    let threads = Arc::new(8_u32);
    registry.gauge(meter_id!("threads.running"), &threads, |t| f64::from(*t));

    std::thread::sleep(Duration::from_millis(250));
    connections.store(38, Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(250));

    // A dropped target reports 0 on the next poll
    drop(queue);
    registry.poll(queue_gauge);

    registry.shutdown();
    println!("Gauge lines published.");
}
