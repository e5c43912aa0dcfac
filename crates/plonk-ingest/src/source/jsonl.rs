//! JSONL event source adapter.
//!
//! Replays repository events from JSONL files, one JSON event per line, in
//! the same shape the live stream delivers. Used for backfills and for
//! rebuilding a lost cache from a recorded stream. Stdin is read through
//! [`ChannelSource::from_reader`](super::ChannelSource::from_reader) instead,
//! so an idle pipe cannot hold up shutdown.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use plonk_core::RepoEvent;

use super::{EventSource, SourceControl, SourceMetadata, SourceStats};
use crate::{Error, Result};

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file, or a directory of `.jsonl`/`.ndjson` files.
    pub input: PathBuf,

    /// Continue processing on errors (log and skip bad lines).
    pub continue_on_error: bool,

    /// Limit number of files to process.
    pub limit: Option<usize>,

    /// Progress reporting interval (events).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            continue_on_error: true,
            limit: None,
            progress_interval: 10_000,
        }
    }
}

/// JSONL file event source.
pub struct JsonlSource {
    config: JsonlConfig,
}

impl JsonlSource {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    /// Collect files to process based on the input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;
        let mut files = Vec::new();

        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext == "jsonl" || ext == "ndjson")
                })
                .collect();

            // Sorted so a replay applies files in a stable order
            entries.sort();
            files = entries;
        } else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        }

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }

        Ok(files)
    }

    /// Process one stream of lines. Returns `Ok(false)` if processing should stop.
    fn process_reader<R, F>(
        &self,
        reader: R,
        label: &str,
        control: &SourceControl,
        handler: &mut F,
        stats: &mut SourceStats,
        bytes_read: &mut usize,
    ) -> Result<bool>
    where
        R: BufRead,
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        for (line_num, line_result) in reader.lines().enumerate() {
            if !control.is_running() {
                tracing::info!("Stop requested, leaving {} at line {}", label, line_num + 1);
                return Ok(false);
            }

            let line = match line_result {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("{}:{}: I/O error: {}", label, line_num + 1, e);
                    control.record_error();
                    stats.invalid_events += 1;
                    if self.config.continue_on_error {
                        continue;
                    }
                    return Err(Error::Io(e));
                }
            };
            *bytes_read += line.len() + 1;

            if line.trim().is_empty() {
                continue;
            }

            stats.total_events += 1;

            let event = match RepoEvent::from_json(&line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("{}:{}: JSON parse error: {}", label, line_num + 1, e);
                    control.record_error();
                    stats.invalid_events += 1;
                    if self.config.continue_on_error {
                        continue;
                    }
                    return Err(Error::Json(e.to_string()));
                }
            };

            stats.valid_events += 1;

            match handler(event) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Handler signaled stop");
                    return Ok(false);
                }
                Err(e) => {
                    if self.config.continue_on_error {
                        tracing::warn!("Handler error: {}", e);
                    } else {
                        return Err(e);
                    }
                }
            }

            if stats
                .total_events
                .is_multiple_of(self.config.progress_interval.max(1))
            {
                tracing::info!(
                    "Progress: {} events, {} valid, {} invalid",
                    stats.total_events,
                    stats.valid_events,
                    stats.invalid_events
                );
            }
        }

        Ok(true)
    }

    fn process_file<F>(
        &self,
        path: &Path,
        control: &SourceControl,
        handler: &mut F,
        stats: &mut SourceStats,
        bytes_read: &mut usize,
    ) -> Result<bool>
    where
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        let reader = BufReader::new(File::open(path)?);
        let label = path.display().to_string();
        self.process_reader(reader, &label, control, handler, stats, bytes_read)
    }
}

impl EventSource for JsonlSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn process<F>(&mut self, control: &SourceControl, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(RepoEvent) -> Result<bool>,
    {
        let mut stats = SourceStats::default();
        let mut bytes_read = 0;
        let mut files_processed = 0;

        let files = self.collect_files()?;
        tracing::info!("Found {} JSONL files to process", files.len());

        for (file_idx, path) in files.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Processing: {}",
                file_idx + 1,
                files.len(),
                path.display()
            );

            match self.process_file(path, control, &mut handler, &mut stats, &mut bytes_read) {
                Ok(true) => files_processed += 1,
                Ok(false) => {
                    files_processed += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error processing {}: {}", path.display(), e);
                    if !self.config.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        stats.source_metadata = SourceMetadata {
            files_processed: Some(files_processed),
            bytes_read: Some(bytes_read),
        };
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const CREATE: &str = r#"{"event":"create","collection":"li.plonk.paste","uri":"at://did:plc:a/li.plonk.paste/1","did":"did:plc:a","record":{"$type":"li.plonk.paste","code":"x","lang":"txt","title":"t","createdAt":"2024-01-01T00:00:00Z"}}"#;
    const DELETE: &str = r#"{"event":"delete","collection":"li.plonk.paste","uri":"at://did:plc:a/li.plonk.paste/1","did":"did:plc:a"}"#;

    fn write_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn collect(source: &mut JsonlSource) -> (Vec<RepoEvent>, SourceStats) {
        let control = SourceControl::new();
        let mut events = Vec::new();
        let stats = source
            .process(&control, |event| {
                events.push(event);
                Ok(true)
            })
            .unwrap();
        (events, stats)
    }

    #[test]
    fn test_skips_bad_lines() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "events.jsonl", &[CREATE, "not json", "", DELETE]);

        let mut source = JsonlSource::new(JsonlConfig {
            input: path,
            ..Default::default()
        });
        let (events, stats) = collect(&mut source);

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, plonk_core::Operation::Delete);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.invalid_events, 1);
        assert_eq!(stats.source_metadata.files_processed, Some(1));
    }

    #[test]
    fn test_bad_line_fails_without_continue_on_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "events.jsonl", &["{broken", CREATE]);

        let mut source = JsonlSource::new(JsonlConfig {
            input: path,
            continue_on_error: false,
            ..Default::default()
        });
        let control = SourceControl::new();
        let result = source.process(&control, |_| Ok(true));
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_directory_is_read_in_order() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "b.jsonl", &[DELETE]);
        write_file(tmp.path(), "a.ndjson", &[CREATE]);
        write_file(tmp.path(), "notes.txt", &[CREATE]);

        let mut source = JsonlSource::new(JsonlConfig {
            input: tmp.path().to_path_buf(),
            ..Default::default()
        });
        let (events, stats) = collect(&mut source);

        let ops: Vec<_> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            ops,
            [plonk_core::Operation::Create, plonk_core::Operation::Delete]
        );
        assert_eq!(stats.source_metadata.files_processed, Some(2));
    }

    #[test]
    fn test_handler_stop_and_running_flag() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "events.jsonl", &[CREATE, CREATE, CREATE]);

        let mut source = JsonlSource::new(JsonlConfig {
            input: path.clone(),
            ..Default::default()
        });
        let control = SourceControl::new();
        let mut seen = 0;
        source
            .process(&control, |_| {
                seen += 1;
                Ok(seen < 2)
            })
            .unwrap();
        assert_eq!(seen, 2);

        let stopped = SourceControl::new();
        stopped.stop();
        let mut seen = 0;
        source
            .process(&stopped, |_| {
                seen += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_missing_input_is_error() {
        let mut source = JsonlSource::new(JsonlConfig {
            input: PathBuf::from("/nonexistent/events.jsonl"),
            ..Default::default()
        });
        let control = SourceControl::new();
        assert!(matches!(
            source.process(&control, |_| Ok(true)),
            Err(Error::Io(_))
        ));
    }
}
