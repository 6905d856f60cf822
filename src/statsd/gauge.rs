use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::warn;

use super::line::LineBuilder;
use super::publisher::Publisher;
use super::MeterId;

/// Bit pattern stored before the first poll: a signalling NaN payload that
/// arithmetic never produces, so the first sample always differs from it.
const UNSET_BITS: u64 = 0x7FF4_0000_0000_0001;

/// A meter sampled by the poll driver.
pub trait StatsdPollable: Send + Sync {
    /// Identity of the meter.
    fn id(&self) -> &MeterId;

    /// Reads the current value.
    ///
    /// This calls user code and may panic; prefer [`StatsdPollable::sample`].
    fn value(&self) -> f64;

    /// Samples the current value, catching a panicking extraction function.
    ///
    /// Returns `None` and logs a warning when the extraction panicked.
    fn sample(&self) -> Option<f64> {
        match catch_unwind(AssertUnwindSafe(|| self.value())) {
            Ok(value) => Some(value),
            Err(payload) => {
                warn!(
                    "Fail to sample gauge {}: {}",
                    self.id(),
                    panic_message(payload.as_ref())
                );
                None
            }
        }
    }

    /// Samples and publishes the value if it changed since the last poll.
    /// Never panics.
    fn poll(&self);
}

/// Gauge bound weakly to a target object.
///
/// The gauge never keeps its target alive; once the target is dropped it
/// reports `0.0`. A line is published only when the sampled bit pattern
/// differs from the previous poll, so an idle gauge stays silent.
pub struct StatsdGauge<T> {
    id: MeterId,
    line_builder: LineBuilder,
    publisher: Publisher,

    target: Weak<T>,
    extractor: Box<dyn Fn(&T) -> f64 + Send + Sync>,
    last_value: AtomicU64,
}

impl<T> StatsdGauge<T>
where
    T: Send + Sync,
{
    /// Binds a gauge to `target` without taking ownership of it.
    pub fn new<F>(
        id: MeterId,
        line_builder: LineBuilder,
        publisher: Publisher,
        target: &Arc<T>,
        extractor: F,
    ) -> Self
    where
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        Self {
            id,
            line_builder,
            publisher,
            target: Arc::downgrade(target),
            extractor: Box::new(extractor),
            last_value: AtomicU64::new(UNSET_BITS),
        }
    }

    /// Whether the target is still alive.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl<T> StatsdPollable for StatsdGauge<T>
where
    T: Send + Sync,
{
    fn id(&self) -> &MeterId {
        &self.id
    }

    fn value(&self) -> f64 {
        self.target
            .upgrade()
            .map_or(0.0, |target| (self.extractor)(&target))
    }

    fn poll(&self) {
        let Some(value) = self.sample() else {
            return;
        };

        let bits = value.to_bits();
        if self.last_value.swap(bits, Ordering::AcqRel) != bits {
            self.publisher.publish(self.line_builder.gauge(value));
        }
    }
}

impl<T> std::fmt::Debug for StatsdGauge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsdGauge")
            .field("id", &self.id)
            .field(
                "last_value",
                &f64::from_bits(self.last_value.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
