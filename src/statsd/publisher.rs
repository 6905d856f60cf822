use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

use super::job::{run_publication_job, PublicationJob};
use super::writer::LineWriterTrait;
use crate::{MetricResult, MetricsError};

/// Diagnostic hooks of a publication channel.
///
/// All hooks run on the channel's consumer thread, never on the thread that
/// publishes, so a slow hook delays delivery but not producers.
pub trait PublicationObserver: Send + Sync {
    /// Called after `line` has been handed to the transport.
    fn on_next(&self, line: &str) {
        let _ = line;
    }

    /// Called for every delivery fault. The channel keeps running.
    fn on_error(&self, err: &MetricsError) {
        let _ = err;
    }

    /// Called once when the channel completes. `live_publishers` counts the
    /// [`Publisher`] handles still alive at that moment.
    fn on_complete(&self, live_publishers: usize) {
        let _ = live_publishers;
    }
}

/// Default observer reporting through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl PublicationObserver for LoggingObserver {
    fn on_next(&self, line: &str) {
        debug!("Forwarded metric line: {line}");
    }

    fn on_error(&self, err: &MetricsError) {
        error!("Error delivering metric line: {err}");
    }

    fn on_complete(&self, live_publishers: usize) {
        if live_publishers > 0 {
            error!("Publication channel completed with {live_publishers} live publishers");
        } else {
            debug!("Publication channel completed");
        }
    }
}

// `closed` and `in_flight` form a handshake: a publisher registers itself
// before reading `closed`, the consumer sets `closed` before reading
// `in_flight`. Both sides use `SeqCst`, so either the publisher sees the
// channel closed or the consumer waits for its send to land.
pub(crate) struct ChannelState {
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

impl ChannelState {
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until no publisher is between its closed check and its send.
    pub(crate) fn wait_for_publishers(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }
    }
}

/// Producer handle of a publication channel.
///
/// Cloning is cheap; every clone feeds the same FIFO queue.
#[derive(Clone)]
pub struct Publisher {
    sender: Sender<String>,
    state: Arc<ChannelState>,
}

impl Publisher {
    /// Enqueues `line` without blocking.
    ///
    /// Returns `false` when the channel has completed and the line was
    /// dropped. A line for which `true` is returned is always handed to the
    /// writer before the channel completes.
    pub fn publish(&self, line: String) -> bool {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        let accepted = self.send(line);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        accepted
    }

    fn send(&self, line: String) -> bool {
        if self.state.is_closed() {
            return false;
        }
        if self.sender.send(line).is_err() {
            if !self.state.closed.swap(true, Ordering::SeqCst) {
                error!("{}", MetricsError::ChannelClosed);
            }
            return false;
        }
        true
    }

    /// Whether the channel has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub(crate) fn publisher_pair() -> (Publisher, Receiver<String>, Arc<ChannelState>) {
    let (sender, receiver) = unbounded();
    let state = Arc::new(ChannelState {
        closed: AtomicBool::new(false),
        in_flight: AtomicUsize::new(0),
    });
    let publisher = Publisher {
        sender,
        state: Arc::clone(&state),
    };
    (publisher, receiver, state)
}

/// Unbounded single-consumer channel forwarding metric lines to a writer.
///
/// A dedicated thread drains the queue in submission order and owns the
/// writer. Dropping the channel drains outstanding lines, flushes the writer
/// and joins the thread.
pub struct PublicationChannel {
    publisher: Publisher,
    shutdown: Option<Sender<()>>,
    job_handle: Option<JoinHandle<()>>,
}

impl PublicationChannel {
    /// Starts the consumer thread.
    ///
    /// # Errors
    /// Returns [`MetricsError::StdIo`] if the thread cannot be spawned.
    pub fn start(
        writer: Box<dyn LineWriterTrait + Send>,
        observer: Arc<dyn PublicationObserver>,
    ) -> MetricResult<Self> {
        let (publisher, lines, state) = publisher_pair();
        let (shutdown, shutdown_receiver) = unbounded::<()>();

        let job = PublicationJob::new(writer, observer, state);
        let job_handle = Builder::new()
            .name("statsd-publisher".to_string())
            .spawn(move || run_publication_job(job, &lines, &shutdown_receiver))?;

        Ok(Self {
            publisher,
            shutdown: Some(shutdown),
            job_handle: Some(job_handle),
        })
    }

    /// Returns a new producer handle.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Drains outstanding lines and stops the consumer thread.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for PublicationChannel {
    fn drop(&mut self) {
        // Dropping the sender wakes the consumer, which drains and completes.
        drop(self.shutdown.take());

        if let Some(handle) = self.job_handle.take() {
            if handle.join().is_err() {
                error!("Publication thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statsd::writer::LineWriterTrait;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct CaptureWriter {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl LineWriterTrait for CaptureWriter {
        fn write(&mut self, line: &str) -> MetricResult<()> {
            if line.starts_with("reject") {
                return Err("rejected".into());
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn flush(&mut self) -> MetricResult<usize> {
            Ok(0)
        }

        fn reset(&mut self) {}
    }

    #[derive(Default)]
    struct CountingObserver {
        next: AtomicUsize,
        errors: AtomicUsize,
        completions: AtomicUsize,
        live_at_completion: AtomicUsize,
    }

    impl PublicationObserver for CountingObserver {
        fn on_next(&self, _line: &str) {
            self.next.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _err: &MetricsError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self, live_publishers: usize) {
            self.completions.fetch_add(1, Ordering::SeqCst);
            self.live_at_completion
                .store(live_publishers, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lines_arrive_in_submission_order() {
        let writer = CaptureWriter::default();
        let channel =
            PublicationChannel::start(Box::new(writer.clone()), Arc::new(LoggingObserver))
                .unwrap();

        let publisher = channel.publisher();
        for i in 0..1000 {
            assert!(publisher.publish(format!("m:{i}|g")));
        }
        drop(publisher);
        channel.shutdown();

        let lines = writer.lines.lock().unwrap();
        let expected: Vec<String> = (0..1000).map(|i| format!("m:{i}|g")).collect();
        assert_eq!(*lines, expected);
    }

    #[test]
    fn test_hooks_observe_next_error_and_completion() {
        let writer = CaptureWriter::default();
        let observer = Arc::new(CountingObserver::default());
        let channel = PublicationChannel::start(Box::new(writer.clone()), observer.clone())
            .unwrap();

        let publisher = channel.publisher();
        publisher.publish("a:1|g".to_string());
        publisher.publish("reject:1|g".to_string());
        publisher.publish("b:1|g".to_string());
        drop(publisher);
        channel.shutdown();

        assert_eq!(observer.next.load(Ordering::SeqCst), 2);
        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert_eq!(observer.live_at_completion.load(Ordering::SeqCst), 0);
        assert_eq!(*writer.lines.lock().unwrap(), vec!["a:1|g", "b:1|g"]);
    }

    #[test]
    fn test_publish_after_completion_is_refused() {
        let observer = Arc::new(CountingObserver::default());
        let channel =
            PublicationChannel::start(Box::new(CaptureWriter::default()), observer.clone())
                .unwrap();

        let publisher = channel.publisher();
        channel.shutdown();

        assert!(publisher.is_closed());
        assert!(!publisher.publish("late:1|g".to_string()));
        assert_eq!(observer.live_at_completion.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_does_not_wait_for_slow_writer() {
        struct SlowWriter;

        impl LineWriterTrait for SlowWriter {
            fn write(&mut self, _line: &str) -> MetricResult<()> {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            }

            fn flush(&mut self) -> MetricResult<usize> {
                Ok(0)
            }

            fn reset(&mut self) {}
        }

        let channel =
            PublicationChannel::start(Box::new(SlowWriter), Arc::new(LoggingObserver)).unwrap();
        let publisher = channel.publisher();

        let start = Instant::now();
        for i in 0..200 {
            publisher.publish(format!("m:{i}|g"));
        }
        // 200 lines take at least one second to deliver
        assert!(start.elapsed() < Duration::from_millis(500));

        drop(publisher);
        channel.shutdown();
    }

    #[test]
    fn test_panicking_writer_keeps_channel_running() {
        struct PanickingWriter {
            lines: Arc<Mutex<Vec<String>>>,
        }

        impl LineWriterTrait for PanickingWriter {
            fn write(&mut self, line: &str) -> MetricResult<()> {
                assert!(!line.starts_with("boom"), "transport failure");
                self.lines.lock().unwrap().push(line.to_string());
                Ok(())
            }

            fn flush(&mut self) -> MetricResult<usize> {
                Ok(0)
            }

            fn reset(&mut self) {}
        }

        let lines = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(CountingObserver::default());
        let writer = PanickingWriter {
            lines: Arc::clone(&lines),
        };
        let channel = PublicationChannel::start(Box::new(writer), observer.clone()).unwrap();

        let publisher = channel.publisher();
        assert!(publisher.publish("boom:1|g".to_string()));
        assert!(publisher.publish("good:1|g".to_string()));
        drop(publisher);
        channel.shutdown();

        assert_eq!(*lines.lock().unwrap(), vec!["good:1|g"]);
        assert_eq!(observer.next.load(Ordering::SeqCst), 1);
        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_accepted_lines_survive_concurrent_shutdown() {
        let writer = CaptureWriter::default();
        let channel =
            PublicationChannel::start(Box::new(writer.clone()), Arc::new(LoggingObserver))
                .unwrap();

        let producers: Vec<_> = (0..4)
            .map(|t| {
                let publisher = channel.publisher();
                std::thread::spawn(move || {
                    let mut accepted = 0;
                    for i in 0..50_000 {
                        if !publisher.publish(format!("m:{i}|g|#t:{t}")) {
                            break;
                        }
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(5));
        channel.shutdown();

        let accepted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(writer.lines.lock().unwrap().len(), accepted);
    }
}
