//! Background ingestion consumer with an explicit start/stop lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{error, info};

use super::{EventOutcome, Ingester};
use crate::source::{EventSource, SourceControl, SourceStats};
use crate::{Error, Result};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Events handed over by the source.
    pub received: usize,
    /// Events written to the cache (inserted, updated or unchanged).
    pub applied: usize,
    /// Events for collections we do not cache.
    pub ignored: usize,
    /// Events whose record failed validation.
    pub rejected: usize,
    /// Delete events.
    pub deleted: usize,
    /// Events whose storage operation failed.
    pub failed: usize,
    /// Unparseable input and upstream errors reported by the source, counted
    /// as they happen.
    pub source_errors: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    applied: AtomicUsize,
    ignored: AtomicUsize,
    rejected: AtomicUsize,
    deleted: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, outcome: &Result<EventOutcome>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(EventOutcome::Ignored) => &self.ignored,
            Ok(EventOutcome::Rejected(_)) => &self.rejected,
            Ok(EventOutcome::Upserted(_)) => &self.applied,
            Ok(EventOutcome::Deleted { .. }) => &self.deleted,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, control: &SourceControl) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            source_errors: control.errors(),
        }
    }
}

/// Runs an [`Ingester`] over an [`EventSource`] on a dedicated thread.
pub struct IngestService;

impl IngestService {
    /// Start consuming `source`. Events are applied one at a time, in the
    /// order the source delivers them.
    pub fn start<S>(ingester: Ingester, mut source: S) -> Result<IngestHandle>
    where
        S: EventSource + Send + 'static,
    {
        let control = Arc::new(SourceControl::new());
        let counters = Arc::new(Counters::default());

        let thread = {
            let control = Arc::clone(&control);
            let counters = Arc::clone(&counters);

            thread::Builder::new()
                .name(format!("ingest-{}", source.name()))
                .spawn(move || {
                    info!("Ingestion consumer started (source: {})", source.name());
                    metrics::gauge!("ingest_running").set(1.0);

                    let result = source.process(&control, |event| {
                        if !control.is_running() {
                            return Ok(false);
                        }

                        let started = Instant::now();
                        let outcome = ingester.apply_event(&event);
                        metrics::histogram!("ingest_apply_duration_seconds")
                            .record(started.elapsed().as_secs_f64());

                        if let Err(e) = &outcome {
                            error!("Failed to apply event for {}: {}", event.uri, e);
                            metrics::counter!("ingest_event_errors_total").increment(1);
                        }
                        counters.record(&outcome);
                        Ok(true)
                    });

                    control.stop();
                    metrics::gauge!("ingest_running").set(0.0);
                    info!("Ingestion consumer stopped");
                    result
                })?
        };

        Ok(IngestHandle {
            control,
            counters,
            thread,
        })
    }
}

/// Handle to a running [`IngestService`].
pub struct IngestHandle {
    control: Arc<SourceControl>,
    counters: Arc<Counters>,
    thread: thread::JoinHandle<Result<SourceStats>>,
}

impl IngestHandle {
    /// Ask the consumer to stop after the event it is applying.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Control shared with the source; hand it to a signal handler.
    pub fn control(&self) -> Arc<SourceControl> {
        Arc::clone(&self.control)
    }

    /// Whether the consumer is still running.
    pub fn is_running(&self) -> bool {
        self.control.is_running() && !self.thread.is_finished()
    }

    /// Counters so far.
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot(&self.control)
    }

    /// Wait for the consumer to finish and return the final counters.
    pub fn join(self) -> Result<IngestStats> {
        let source_stats = self
            .thread
            .join()
            .map_err(|_| Error::Pipeline("ingestion thread panicked".to_string()))??;
        info!(
            "Source finished: {} events, {} valid",
            source_stats.total_events, source_stats.valid_events
        );

        Ok(self.counters.snapshot(&self.control))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::shorturl::{AllocatorConfig, ShortUrlAllocator};
    use crate::source::{ChannelSource, SourceMessage};
    use plonk_core::{Operation, RepoEvent};
    use serde_json::json;
    use std::io::{BufReader, Write};
    use std::time::Duration;

    fn wait_for(handle: &IngestHandle, done: impl Fn(&IngestStats) -> bool) {
        for _ in 0..200 {
            if done(&handle.stats()) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out, stats: {:?}", handle.stats());
    }

    fn ingester() -> (Ingester, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::open_in_memory().unwrap());
        let allocator = Arc::new(ShortUrlAllocator::new(AllocatorConfig::default()));
        (Ingester::new(Arc::clone(&store), allocator), store)
    }

    fn paste_event(n: usize) -> RepoEvent {
        RepoEvent {
            event: Operation::Create,
            collection: "li.plonk.paste".to_string(),
            uri: format!("at://did:plc:alice/li.plonk.paste/{n}"),
            did: "did:plc:alice".to_string(),
            cid: None,
            record: Some(json!({
                "$type": "li.plonk.paste",
                "code": "x",
                "lang": "txt",
                "title": format!("paste {n}"),
                "createdAt": "2024-05-01T00:00:00Z",
            })),
        }
    }

    #[test]
    fn test_consumes_until_channel_closes() {
        let (ingester, store) = ingester();
        let (tx, source) = ChannelSource::channel(16);
        let handle = IngestService::start(ingester, source).unwrap();

        for n in 0..5 {
            tx.send(SourceMessage::Event(paste_event(n))).unwrap();
        }
        tx.send(SourceMessage::Error("upstream hiccup".to_string()))
            .unwrap();
        let mut bad = paste_event(5);
        bad.record = None;
        tx.send(SourceMessage::Event(bad)).unwrap();
        tx.send(SourceMessage::Event(paste_event(6))).unwrap();
        drop(tx);

        let stats = handle.join().unwrap();
        assert_eq!(stats.received, 7);
        assert_eq!(stats.applied, 6);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.source_errors, 1);
        assert_eq!(store.paste_count().unwrap(), 6);
    }

    #[test]
    fn test_stop_ends_consumer() {
        let (ingester, store) = ingester();
        let (tx, source) = ChannelSource::channel(16);
        let handle = IngestService::start(ingester, source).unwrap();

        tx.send(SourceMessage::Event(paste_event(1))).unwrap();
        // Wait for the first event to land before stopping
        wait_for(&handle, |s| s.received == 1);

        handle.stop();
        assert!(!handle.control().is_running());
        let stats = handle.join().unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(store.paste_count().unwrap(), 1);

        // The sender outlives the consumer; sends after stop are not applied
        let _ = tx.send(SourceMessage::Event(paste_event(2)));
        assert_eq!(store.paste_count().unwrap(), 1);
    }

    #[test]
    fn test_source_errors_are_visible_while_running() {
        let (ingester, _store) = ingester();
        let (tx, source) = ChannelSource::channel(16);
        let handle = IngestService::start(ingester, source).unwrap();

        tx.send(SourceMessage::Error("upstream hiccup".to_string()))
            .unwrap();
        tx.send(SourceMessage::Event(paste_event(1))).unwrap();
        wait_for(&handle, |s| s.received == 1);
        assert_eq!(handle.stats().source_errors, 1);

        drop(tx);
        assert_eq!(handle.join().unwrap().source_errors, 1);
    }

    #[test]
    fn test_stop_ends_idle_stdin_style_source() {
        let (ingester, store) = ingester();
        let (reader, mut writer) = std::io::pipe().unwrap();
        let source = ChannelSource::from_reader(BufReader::new(reader), "pipe", 16, true)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let handle = IngestService::start(ingester, source).unwrap();

        let line = serde_json::to_string(&paste_event(1)).unwrap();
        writeln!(writer, "{line}").unwrap();
        wait_for(&handle, |s| s.applied == 1);

        // The writer stays open, so the reader thread is blocked on the pipe
        let started = Instant::now();
        handle.stop();
        let stats = handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stats.received, 1);
        assert_eq!(store.paste_count().unwrap(), 1);
        drop(writer);
    }
}
