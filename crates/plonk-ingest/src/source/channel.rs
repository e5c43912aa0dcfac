//! Live event source fed through a channel.
//!
//! The transport that subscribes to the upstream event stream runs elsewhere
//! (usually an async task); it pushes each decoded event, and each delivery
//! error, into a [`crossbeam_channel`] that this source drains.
//!
//! Blocking line streams such as stdin go through the same path: a reader
//! thread decodes lines into the channel, so the consumer keeps polling for
//! a stop request while the stream is idle.

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use plonk_core::RepoEvent;

use super::{EventSource, SourceControl, SourceStats};
use crate::Result;

/// Message pushed by the upstream subscriber.
#[derive(Debug, Clone)]
pub enum SourceMessage {
    /// A decoded repository event.
    Event(RepoEvent),
    /// The subscription reported an error; the stream is still live.
    Error(String),
}

/// Event source backed by a channel receiver.
pub struct ChannelSource {
    receiver: Receiver<SourceMessage>,
    poll_interval: Duration,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<SourceMessage>) -> Self {
        Self {
            receiver,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// A bounded channel and the source draining it.
    pub fn channel(capacity: usize) -> (Sender<SourceMessage>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self::new(rx))
    }

    /// Decode JSON events from `reader`, one per line, on a dedicated thread.
    ///
    /// Unparseable lines arrive as [`SourceMessage::Error`]; without
    /// `continue_on_error` the first one also ends the stream. The reader
    /// thread exits at end of input or once the source is dropped and its
    /// next send fails.
    pub fn from_reader<R>(
        reader: R,
        label: &str,
        capacity: usize,
        continue_on_error: bool,
    ) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, source) = Self::channel(capacity);
        let label = label.to_string();
        thread::Builder::new()
            .name(format!("{label}-reader"))
            .spawn(move || read_lines(reader, &label, &tx, continue_on_error))?;
        Ok(source)
    }

    /// How often the running flag is checked while the channel is idle.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn process<F>(&mut self, control: &SourceControl, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        let mut stats = SourceStats::default();

        while control.is_running() {
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(SourceMessage::Event(event)) => {
                    stats.total_events += 1;
                    stats.valid_events += 1;
                    if !handler(event)? {
                        tracing::info!("Handler signaled stop");
                        break;
                    }
                }
                Ok(SourceMessage::Error(message)) => {
                    tracing::warn!("Event source error: {}", message);
                    metrics::counter!("ingest_source_errors_total").increment(1);
                    control.record_error();
                    stats.upstream_errors += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Event channel disconnected, stopping source");
                    break;
                }
            }
        }

        Ok(stats)
    }
}

fn read_lines<R: BufRead>(
    reader: R,
    label: &str,
    tx: &Sender<SourceMessage>,
    continue_on_error: bool,
) {
    for (line_num, line) in reader.lines().enumerate() {
        let message = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match RepoEvent::from_json(&line) {
                Ok(event) => SourceMessage::Event(event),
                Err(e) => SourceMessage::Error(format!(
                    "{}:{}: JSON parse error: {}",
                    label,
                    line_num + 1,
                    e
                )),
            },
            Err(e) => SourceMessage::Error(format!("{}:{}: I/O error: {}", label, line_num + 1, e)),
        };

        let fatal = !continue_on_error && matches!(message, SourceMessage::Error(_));
        if tx.send(message).is_err() {
            tracing::debug!("{} consumer gone, reader exiting", label);
            return;
        }
        if fatal {
            return;
        }
    }
    tracing::info!("Reached end of {}", label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use plonk_core::Operation;
    use std::io::Cursor;
    use std::sync::Arc;

    fn delete_event(n: usize) -> RepoEvent {
        RepoEvent {
            event: Operation::Delete,
            collection: "li.plonk.comment".to_string(),
            uri: format!("at://did:plc:a/li.plonk.comment/{n}"),
            did: "did:plc:a".to_string(),
            cid: None,
            record: None,
        }
    }

    #[test]
    fn test_errors_do_not_stop_source() {
        let (tx, mut source) = ChannelSource::channel(8);
        tx.send(SourceMessage::Event(delete_event(1))).unwrap();
        tx.send(SourceMessage::Error("connection reset".to_string()))
            .unwrap();
        tx.send(SourceMessage::Event(delete_event(2))).unwrap();
        drop(tx);

        let control = SourceControl::new();
        let mut uris = Vec::new();
        let stats = source
            .process(&control, |event| {
                uris.push(event.uri);
                Ok(true)
            })
            .unwrap();

        assert_eq!(uris.len(), 2);
        assert_eq!(stats.valid_events, 2);
        assert_eq!(stats.upstream_errors, 1);
        assert_eq!(control.errors(), 1);
    }

    const DELETE: &str = r#"{"event":"delete","collection":"li.plonk.paste","uri":"at://did:plc:a/li.plonk.paste/1","did":"did:plc:a"}"#;

    #[test]
    fn test_reader_lines_become_events_and_errors() {
        let input = format!("{DELETE}\n\nnot json\n{DELETE}\n");
        let mut source = ChannelSource::from_reader(Cursor::new(input), "test", 4, true).unwrap();

        let control = SourceControl::new();
        let mut seen = 0;
        let stats = source
            .process(&control, |_| {
                seen += 1;
                Ok(true)
            })
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(stats.upstream_errors, 1);
        assert_eq!(control.errors(), 1);
    }

    #[test]
    fn test_reader_stops_at_bad_line_without_continue_on_error() {
        let input = format!("{DELETE}\n{{broken\n{DELETE}\n");
        let mut source = ChannelSource::from_reader(Cursor::new(input), "test", 4, false).unwrap();

        let control = SourceControl::new();
        let mut seen = 0;
        source
            .process(&control, |_| {
                seen += 1;
                Ok(true)
            })
            .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(control.errors(), 1);
    }

    #[test]
    fn test_running_flag_stops_idle_source() {
        let (_tx, source) = ChannelSource::channel(8);
        let mut source = source.with_poll_interval(Duration::from_millis(5));
        let control = Arc::new(SourceControl::new());

        let stopper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                control.stop();
            })
        };

        let stats = source.process(&control, |_| Ok(true)).unwrap();
        stopper.join().unwrap();
        assert_eq!(stats.total_events, 0);
    }
}
