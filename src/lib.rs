//! # statsd-pollable
//!
//! Weakly bound StatsD gauges, polled on a schedule and published through an
//! asynchronous line channel.
//!
//! ## Features
//!
//! - **Non-intrusive sampling**: gauges hold a `Weak` reference to the measured
//!   object and report `0.0` once it is gone
//! - **Publish on change**: a poll emits a line only when the value's bit
//!   pattern changed since the previous poll
//! - **Never blocks the poller**: lines go through an unbounded FIFO channel
//!   drained by a dedicated thread that owns the transport
//! - **Multiple flavors**: Datadog, Etsy and Telegraf line dialects
//! - **Multiple writer backends**: Simple, `LinuxBatch` and Custom writers
//!
//! ## Quick Start
//!
//! ```no_run
//! use statsd_pollable::{meter_id, GaugeRegistry, GaugeRegistryOptions, StatsdFlavor};
//! use std::collections::VecDeque;
//! use std::net::SocketAddr;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let options = GaugeRegistryOptions {
//!     flavor: StatsdFlavor::Datadog,
//!     prefix: "myapp.".to_string(),
//!     poll_interval: Some(Duration::from_secs(10)),
//!     ..GaugeRegistryOptions::default()
//! };
//!
//! let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
//! let dst_addr: SocketAddr = "127.0.0.1:8125".parse().unwrap();
//! let registry = GaugeRegistry::new(bind_addr, dst_addr, options).unwrap();
//!
//! let queue = Arc::new(Mutex::new(VecDeque::<u64>::new()));
//! registry.gauge(meter_id!("queue.depth", "queue" => "jobs"), &queue, |q| {
//!     q.lock().map_or(0.0, |q| q.len() as f64)
//! });
//!
//! // polled every 10 seconds until the registry is dropped
//! registry.shutdown();
//! ```

// #![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
//#![deny(clippy::unreachable)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

// https://github.com/statsd/statsd/blob/master/docs/metric_types.md
mod error;
mod statsd;

pub use error::MetricsError;
pub use statsd::gauge::{StatsdGauge, StatsdPollable};
pub use statsd::line::{encode_gauge, LineBuilder, StatsdFlavor};
pub use statsd::publisher::{LoggingObserver, PublicationChannel, PublicationObserver, Publisher};
pub use statsd::registry::{BindingHandle, GaugeRegistry, GaugeRegistryOptions};
#[cfg(target_os = "linux")]
pub use statsd::writer::{BatchWriter, LineWriterLinux};
pub use statsd::writer::{
    LineWriterSimple, LineWriterTrait, LineWriterType, UdpSocketWriter, Writer,
    DEFAULT_LINE_WRITER_TYPE,
};
pub use statsd::MeterId;

/// Result type for metric operations.
///
/// Wraps errors that can occur during metric publication and transmission.
pub type MetricResult<T> = Result<T, MetricsError>;
