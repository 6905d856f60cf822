#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_pollable::{
    GaugeRegistry, GaugeRegistryOptions, LineWriterTrait, LineWriterType, MeterId, MetricResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct NullWriter;

impl LineWriterTrait for NullWriter {
    fn write(&mut self, line: &str) -> MetricResult<()> {
        assert!(!line.contains('\n'));
        Ok(())
    }

    fn flush(&mut self) -> MetricResult<usize> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

// Fuzz target driving registration, polling and deregistration
fuzz_target!(|data: &[u8]| {
    let options = GaugeRegistryOptions {
        poll_interval: None,
        writer_type: LineWriterType::Custom(Box::new(NullWriter)),
        ..GaugeRegistryOptions::default()
    };
    let registry = GaugeRegistry::new(
        "0.0.0.0:0".parse().unwrap(),
        "127.0.0.1:9999".parse().unwrap(),
        options,
    )
    .unwrap();

    let reading = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for op in data {
        match op % 4 {
            0 => handles.push(registry.gauge(
                MeterId::new(format!("fuzz.{}", op / 4 % 8)),
                &reading,
                |r| f64::from_bits(r.load(Ordering::Relaxed)),
            )),
            1 => {
                if let Some(handle) = handles.pop() {
                    registry.deregister(handle);
                }
            }
            2 => reading.store(u64::from(*op) << 52, Ordering::Relaxed),
            _ => registry.poll_all(),
        }
    }

    assert!(registry.len() <= 8);
    registry.shutdown();
});
