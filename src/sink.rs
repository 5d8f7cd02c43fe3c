//! Durable NDJSON output.
//!
//! Every record becomes one JSON line appended to `<dir>/<run_id>.ndjson` and
//! flushed before `write` returns. Lines are never rewritten, and a write that
//! fails partway is cut back to the previous line end, so a reader can trust
//! whatever is already on disk.
//!
//! If the file cannot be created or written, the same JSON is written to the
//! fallback stream (stdout by default) behind a `TEST_RESULT:` or
//! `TEST_SUMMARY:` marker. Once the primary fails the sink stays on the
//! fallback for the rest of the run. If the fallback fails too, the line is
//! dropped. Nothing here returns an error to the caller.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::record::{RunSummary, TestTelemetryRecord, SUMMARY_TYPE};
use crate::telemetry::metrics;

pub const RESULT_MARKER: &str = "TEST_RESULT:";
pub const SUMMARY_MARKER: &str = "TEST_SUMMARY:";

/// Where a line ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    File,
    Fallback,
    Dropped,
}

enum Primary {
    Unopened,
    Open(File),
    Failed,
}

pub struct NdjsonSink {
    path: PathBuf,
    primary: Mutex<Primary>,
    fallback: Mutex<Box<dyn Write + Send>>,
}

impl NdjsonSink {
    /// Sink writing to `<dir>/<run_id>.ndjson`, falling back to stdout.
    pub fn new(dir: impl AsRef<Path>, run_id: &str) -> Self {
        Self::with_fallback(dir, run_id, Box::new(io::stdout()))
    }

    pub fn with_fallback(dir: impl AsRef<Path>, run_id: &str, fallback: Box<dyn Write + Send>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.ndjson", run_id)),
            primary: Mutex::new(Primary::Unopened),
            fallback: Mutex::new(fallback),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the primary file has failed and output goes to the fallback.
    pub fn is_degraded(&self) -> bool {
        matches!(*self.primary.lock(), Primary::Failed)
    }

    pub fn write(&self, record: &TestTelemetryRecord) -> SinkOutcome {
        self.emit(record, RESULT_MARKER)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> SinkOutcome {
        self.emit(summary, SUMMARY_MARKER)
    }

    fn emit<T: Serialize>(&self, value: &T, marker: &str) -> SinkOutcome {
        let line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unserializable telemetry line");
                return SinkOutcome::Dropped;
            }
        };

        if self.write_primary(&line) {
            return SinkOutcome::File;
        }
        metrics::record_sink_fallback();
        self.write_fallback(marker, &line)
    }

    fn write_primary(&self, line: &str) -> bool {
        let mut primary = self.primary.lock();
        if matches!(*primary, Primary::Unopened) {
            *primary = match open_append(&self.path) {
                Ok(file) => Primary::Open(file),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Telemetry file unavailable, using fallback stream");
                    Primary::Failed
                }
            };
        }

        let Primary::Open(file) = &mut *primary else {
            return false;
        };
        match append_line(file, line) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Telemetry write failed, using fallback stream");
                *primary = Primary::Failed;
                false
            }
        }
    }

    fn write_fallback(&self, marker: &str, line: &str) -> SinkOutcome {
        let mut out = self.fallback.lock();
        let written = writeln!(out, "{}{}", marker, line).and_then(|()| out.flush());
        match written {
            Ok(()) => SinkOutcome::Fallback,
            Err(e) => {
                tracing::debug!(error = %e, "Fallback stream failed, dropping telemetry line");
                SinkOutcome::Dropped
            }
        }
    }
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink")
            .field("path", &self.path)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// A writer whose tail can be cut back after a failed write.
trait LineTarget: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LineTarget for File {
    fn end(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `line` plus a newline. On failure no partial line is left behind.
fn append_line<T: LineTarget>(target: &mut T, line: &str) -> io::Result<()> {
    let start = target.end()?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let written = target.write_all(buf.as_bytes()).and_then(|()| target.flush());
    if let Err(e) = written {
        if let Err(cut) = target.truncate_to(start) {
            tracing::debug!(error = %cut, "Could not remove partial telemetry line");
        }
        return Err(e);
    }
    Ok(())
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// One decoded output line.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkLine {
    Test(Box<TestTelemetryRecord>),
    Summary(RunSummary),
}

/// Decode a line from a telemetry file or a fallback stream. Marker prefixes
/// are accepted; anything unparseable yields `None`.
pub fn parse_line(line: &str) -> Option<SinkLine> {
    let line = line.trim();
    let json = line
        .strip_prefix(RESULT_MARKER)
        .or_else(|| line.strip_prefix(SUMMARY_MARKER))
        .unwrap_or(line);
    let value: Value = serde_json::from_str(json).ok()?;

    if value.get("type").and_then(Value::as_str) == Some(SUMMARY_TYPE) {
        serde_json::from_value(value).ok().map(SinkLine::Summary)
    } else {
        serde_json::from_value(value)
            .ok()
            .map(|record| SinkLine::Test(Box::new(record)))
    }
}

/// Read every decodable line from a telemetry file.
pub fn read_file(path: &Path) -> io::Result<Vec<SinkLine>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        if let Some(parsed) = parse_line(&line?) {
            lines.push(parsed);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RunCounts;

    /// In-memory target that accepts `room` more bytes, then reports a full disk.
    struct FullDisk {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LineTarget for FullDisk {
        fn end(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_partial_line() {
        let mut target = FullDisk {
            data: b"{\"id\":\"a\"}\n".to_vec(),
            room: 5,
        };

        assert!(append_line(&mut target, "{\"id\":\"b\"}").is_err());
        assert_eq!(target.data, b"{\"id\":\"a\"}\n".to_vec());

        target.room = 64;
        append_line(&mut target, "{\"id\":\"c\"}").unwrap();
        assert_eq!(target.data, b"{\"id\":\"a\"}\n{\"id\":\"c\"}\n".to_vec());
    }

    #[test]
    fn test_summary_goes_to_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = NdjsonSink::new(dir.path().join("telemetry"), "run_a");

        let outcome = sink.write_summary(&RunSummary::new("run_a", RunCounts::default(), false));
        assert_eq!(outcome, SinkOutcome::File);
        assert!(sink.path().ends_with("telemetry/run_a.ndjson"));

        let lines = read_file(sink.path()).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(matches!(lines[0], SinkLine::Summary(_)));
    }

    #[test]
    fn test_parse_line_accepts_markers() {
        let summary = RunSummary::new("r", RunCounts::default(), true);
        let json = serde_json::to_string(&summary).unwrap();

        let parsed = parse_line(&format!("{}{}", SUMMARY_MARKER, json)).unwrap();
        assert_eq!(parsed, SinkLine::Summary(summary));
        assert!(parse_line("not json").is_none());
    }
}
