use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error};

use super::gauge::{StatsdGauge, StatsdPollable};
use super::job::{poll_bindings, run_poll_driver};
use super::line::{LineBuilder, StatsdFlavor};
use super::publisher::{LoggingObserver, PublicationChannel, PublicationObserver};
use super::writer::{build_line_writer, LineWriterType, DEFAULT_LINE_WRITER_TYPE};
use super::MeterId;
use crate::MetricResult;

/// Handle returned by [`GaugeRegistry::gauge`], used to poll or deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingHandle(u64);

#[derive(Default)]
pub(crate) struct Bindings {
    by_handle: DashMap<u64, Arc<dyn StatsdPollable>>,
    by_id: DashMap<MeterId, u64>,
}

impl Bindings {
    fn get(&self, handle: BindingHandle) -> Option<Arc<dyn StatsdPollable>> {
        self.by_handle
            .get(&handle.0)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn StatsdPollable>> {
        self.by_handle
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn clear(&self) {
        self.by_handle.clear();
        self.by_id.clear();
    }
}

/// Configuration options for the gauge registry.
///
/// Controls the line flavor, naming, polling cadence and transport backend.
pub struct GaugeRegistryOptions {
    /// Dialect of the line protocol.
    pub flavor: StatsdFlavor,
    /// Prefix prepended verbatim to all metric names. Include a trailing dot if desired (e.g., `"myapp."` results in `"myapp.metric"`).
    pub prefix: String,
    /// Tags added to every gauge. A gauge's own tag with the same key wins.
    pub common_tags: Vec<(String, String)>,
    /// How often the driver thread polls every gauge. `None` disables the
    /// driver; call [`GaugeRegistry::poll_all`] instead. Must not be zero.
    pub poll_interval: Option<Duration>,
    /// Maximum size of a single UDP packet in bytes. Recommended: 1432 for safe MTU.
    pub max_udp_packet_size: u16,
    /// Maximum number of packets sent in a single `sendmmsg` call.
    pub max_udp_batch_size: u32,
    /// The transport backend to use.
    pub writer_type: LineWriterType,
    /// Hooks observing the publication channel.
    pub observer: Arc<dyn PublicationObserver>,
}

impl Default for GaugeRegistryOptions {
    fn default() -> Self {
        Self {
            flavor: StatsdFlavor::default(),
            prefix: String::new(),
            common_tags: Vec::new(),
            poll_interval: Some(Duration::from_secs(10)),
            max_udp_packet_size: 1432,
            max_udp_batch_size: 10,
            writer_type: DEFAULT_LINE_WRITER_TYPE,
            observer: Arc::new(LoggingObserver),
        }
    }
}

impl std::fmt::Debug for GaugeRegistryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeRegistryOptions")
            .field("flavor", &self.flavor)
            .field("prefix", &self.prefix)
            .field("common_tags", &self.common_tags)
            .field("poll_interval", &self.poll_interval)
            .field("max_udp_packet_size", &self.max_udp_packet_size)
            .field("max_udp_batch_size", &self.max_udp_batch_size)
            .field("writer_type", &self.writer_type)
            .finish_non_exhaustive()
    }
}

/// Registry of weakly bound gauges publishing StatsD lines.
///
/// `GaugeRegistry` owns a publication channel with its consumer thread and,
/// unless disabled, a driver thread polling every gauge on a fixed interval.
/// Each poll publishes a line only when the gauge value changed. Dropping the
/// registry stops polling, drains queued lines and flushes the transport.
///
/// This type is `Send + Sync` and can be shared across threads via `Arc<GaugeRegistry>`.
///
/// # Example
///
/// ```no_run
/// use statsd_pollable::{GaugeRegistry, GaugeRegistryOptions, MeterId};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let registry = GaugeRegistry::new(
///     "0.0.0.0:0".parse().unwrap(),
///     "127.0.0.1:8125".parse().unwrap(),
///     GaugeRegistryOptions::default(),
/// )
/// .unwrap();
///
/// let connections = Arc::new(AtomicUsize::new(0));
/// registry.gauge(
///     MeterId::new("connections.active").with_tag("pool", "main"),
///     &connections,
///     |c| c.load(Ordering::Relaxed) as f64,
/// );
/// ```
pub struct GaugeRegistry {
    bindings: Arc<Bindings>,
    next_handle: AtomicU64,

    flavor: StatsdFlavor,
    prefix: String,
    common_tags: Vec<(String, String)>,

    channel: PublicationChannel,
    // only used in cold path
    driver_shutdown: Option<Sender<()>>,
    driver_handle: Option<JoinHandle<()>>,
}

impl GaugeRegistry {
    /// Creates a registry sending lines to `dst_addr`.
    ///
    /// Binds a UDP socket to `bind_addr` (unless a custom writer is
    /// configured), then spawns the publication thread and the poll driver.
    ///
    /// # Errors
    /// Returns [`crate::MetricsError::StdIo`] if the socket cannot be bound or
    /// a thread cannot be spawned, and [`crate::MetricsError::Custom`] if
    /// `poll_interval` is zero.
    pub fn new(
        bind_addr: SocketAddr,
        dst_addr: SocketAddr,
        options: GaugeRegistryOptions,
    ) -> MetricResult<Self> {
        if options.poll_interval.is_some_and(|interval| interval.is_zero()) {
            return Err("Poll interval must be greater than zero".into());
        }

        let writer = build_line_writer(
            options.writer_type,
            bind_addr,
            dst_addr,
            options.max_udp_packet_size,
            options.max_udp_batch_size,
        )?;
        let channel = PublicationChannel::start(writer, options.observer)?;

        let mut registry = Self {
            bindings: Arc::new(Bindings::default()),
            next_handle: AtomicU64::new(0),
            flavor: options.flavor,
            prefix: options.prefix,
            common_tags: options.common_tags,
            channel,
            driver_shutdown: None,
            driver_handle: None,
        };

        if let Some(poll_interval) = options.poll_interval {
            let (sender, receiver) = unbounded::<()>();
            let bindings = Arc::clone(&registry.bindings);
            let handle = Builder::new()
                .name("statsd-poll-driver".to_string())
                .spawn(move || run_poll_driver(&bindings, poll_interval, &receiver))?;
            registry.driver_shutdown = Some(sender);
            registry.driver_handle = Some(handle);
        }

        Ok(registry)
    }

    /// Registers a gauge reading `extractor(target)` on every poll.
    ///
    /// The registry keeps only a weak reference to `target`; once it is
    /// dropped the gauge reports `0.0`. Registering an identity that is
    /// already present returns the existing handle and ignores `target`.
    pub fn gauge<T, F>(&self, id: MeterId, target: &Arc<T>, extractor: F) -> BindingHandle
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        match self.bindings.by_id.entry(id) {
            Entry::Occupied(entry) => {
                debug!("Gauge {} already registered", entry.key());
                BindingHandle(*entry.get())
            }
            Entry::Vacant(entry) => {
                let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                let id = entry.key().clone();
                let line_builder = LineBuilder::new(&id, self.flavor, &self.prefix, &self.common_tags);
                let publisher = self.channel.publisher();
                let gauge = StatsdGauge::new(id, line_builder, publisher, target, extractor);

                self.bindings.by_handle.insert(handle, Arc::new(gauge));
                entry.insert(handle);
                BindingHandle(handle)
            }
        }
    }

    /// Removes a gauge. Returns `false` if the handle is unknown.
    pub fn deregister(&self, handle: BindingHandle) -> bool {
        let Some((_, binding)) = self.bindings.by_handle.remove(&handle.0) else {
            return false;
        };
        self.bindings
            .by_id
            .remove_if(binding.id(), |_, registered| *registered == handle.0);
        true
    }

    /// Polls one gauge. Unknown handles are ignored.
    pub fn poll(&self, handle: BindingHandle) {
        match self.bindings.get(handle) {
            Some(binding) => binding.poll(),
            None => debug!("Poll of unknown gauge handle {handle:?}"),
        }
    }

    /// Polls every registered gauge once.
    pub fn poll_all(&self) {
        poll_bindings(&self.bindings);
    }

    /// Samples a gauge without publishing.
    ///
    /// Returns `None` for an unknown handle or a panicking extraction function.
    #[must_use]
    pub fn value(&self, handle: BindingHandle) -> Option<f64> {
        self.bindings.get(handle)?.sample()
    }

    /// Number of registered gauges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.by_handle.len()
    }

    /// Whether no gauge is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.by_handle.is_empty()
    }

    /// Stops polling, flushes pending lines and joins the background threads.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for GaugeRegistry {
    fn drop(&mut self) {
        drop(self.driver_shutdown.take());
        if let Some(handle) = self.driver_handle.take() {
            if handle.join().is_err() {
                error!("Poll driver thread panicked");
            }
        }

        // gauges hold publishers, release them before the channel completes
        // when it is dropped right after this
        self.bindings.clear();
    }
}
