use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{tick, Receiver};
use crossbeam::select;

use super::gauge::{panic_message, StatsdPollable};
use super::publisher::{ChannelState, PublicationObserver};
use super::registry::Bindings;
use super::writer::LineWriterTrait;
use crate::{MetricResult, MetricsError};

pub(crate) struct PublicationJob {
    writer: Box<dyn LineWriterTrait + Send>,
    observer: Arc<dyn PublicationObserver>,
    state: Arc<ChannelState>,
}

impl PublicationJob {
    pub(crate) fn new(
        writer: Box<dyn LineWriterTrait + Send>,
        observer: Arc<dyn PublicationObserver>,
        state: Arc<ChannelState>,
    ) -> Self {
        Self {
            writer,
            observer,
            state,
        }
    }

    fn forward(&mut self, line: &str) {
        let writer = &mut self.writer;
        match guarded(|| writer.write(line)) {
            Ok(()) => self.observer.on_next(line),
            Err(err) => self.observer.on_error(&err),
        }
    }

    fn drain(&mut self, lines: &Receiver<String>) {
        while let Ok(line) = lines.try_recv() {
            self.forward(&line);
        }
    }

    fn flush(&mut self) {
        let writer = &mut self.writer;
        if let Err(err) = guarded(|| writer.flush()) {
            self.observer.on_error(&err);
        }
    }

    fn complete(mut self, lines: &Receiver<String>) {
        // close first so that late publishers are refused instead of lost
        self.state.close();
        self.state.wait_for_publishers();
        self.drain(lines);
        self.flush();
        let writer = &mut self.writer;
        if let Err(err) = guarded(|| {
            writer.reset();
            Ok(())
        }) {
            self.observer.on_error(&err);
        }

        // the channel handle and this job each hold one reference
        let live_publishers = Arc::strong_count(&self.state).saturating_sub(2);
        self.observer.on_complete(live_publishers);
    }
}

// A panicking writer becomes a delivery fault so the consumer thread survives.
fn guarded<T>(call: impl FnOnce() -> MetricResult<T>) -> MetricResult<T> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(MetricsError::Custom(format!(
            "Line writer panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

pub(crate) fn run_publication_job(
    mut job: PublicationJob,
    lines: &Receiver<String>,
    shutdown: &Receiver<()>,
) {
    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    job.forward(&line);
                    // pack whatever else is queued before sending
                    job.drain(lines);
                    job.flush();
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    job.complete(lines);
}

pub(crate) fn run_poll_driver(bindings: &Bindings, poll_interval: Duration, shutdown: &Receiver<()>) {
    let ticker = tick(poll_interval);

    loop {
        select! {
            recv(ticker) -> _ => poll_bindings(bindings),
            recv(shutdown) -> _ => return,
        }
    }
}

pub(crate) fn poll_bindings(bindings: &Bindings) {
    // snapshot first so no map shard stays locked while extractors run
    let snapshot: Vec<Arc<dyn StatsdPollable>> = bindings.snapshot();
    for binding in snapshot {
        binding.poll();
    }
}
