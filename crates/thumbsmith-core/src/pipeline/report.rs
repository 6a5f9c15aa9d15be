//! Failure reports for tasks that will not be retried.
//!
//! Every permanent failure, including transient failures that ran out of
//! attempts, produces one [`FailureReport`]. Sinks decide where it goes:
//! the log, a JSONL file, or memory for tests.

use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::state::TaskState;

/// Operator-facing record of a discarded task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Photo id, absent when the payload could not be parsed
    pub photo_id: Option<String>,
    /// State the task was in when it failed
    pub state: TaskState,
    /// Delivery attempt that produced the failure (1-based)
    pub attempt: u32,
    /// Set when a transient failure ran out of attempts
    pub escalated: bool,
    pub error: String,
    /// Seconds since the Unix epoch
    pub reported_at: u64,
}

impl FailureReport {
    pub fn new(
        photo_id: Option<String>,
        state: TaskState,
        attempt: u32,
        escalated: bool,
        error: impl Into<String>,
    ) -> Self {
        let reported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            photo_id,
            state,
            attempt,
            escalated,
            error: error.into(),
            reported_at,
        }
    }
}

/// Destination for failure reports.
///
/// `report` is called from worker tasks on the async runtime and must not
/// block. Sinks that write to files buffer there and do their I/O in
/// `flush`, which the worker runs on a blocking thread when it stops.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &FailureReport);

    fn flush(&self) {}
}

/// Emits reports as structured `tracing` errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, report: &FailureReport) {
        tracing::error!(
            photo_id = report.photo_id.as_deref().unwrap_or("-"),
            state = %report.state,
            attempt = report.attempt,
            escalated = report.escalated,
            "Task failed permanently: {}",
            report.error
        );
    }
}

/// Logs reports and collects them as JSON Lines, written out on `flush`.
pub struct JsonlSink<W: Write + Send> {
    pending: Mutex<Vec<u8>>,
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            writer: Mutex::new(writer),
        }
    }

    /// Flush pending lines, then return the underlying writer.
    pub fn into_inner(self) -> W {
        self.flush();
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_pending(&self) -> std::io::Result<()> {
        let lines = std::mem::take(&mut *lock(&self.pending));
        if lines.is_empty() {
            return Ok(());
        }
        let mut writer = lock(&self.writer);
        writer.write_all(&lines)?;
        writer.flush()
    }
}

impl<W: Write + Send> ReportSink for JsonlSink<W> {
    fn report(&self, report: &FailureReport) {
        LogSink.report(report);

        let mut pending = lock(&self.pending);
        match serde_json::to_writer(&mut *pending, report) {
            Ok(()) => pending.push(b'\n'),
            Err(e) => tracing::warn!("Failed to encode failure report: {e}"),
        }
    }

    fn flush(&self) {
        if let Err(e) = self.write_pending() {
            tracing::warn!("Failed to write failure reports: {e}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<FailureReport>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for CollectingSink {
    fn report(&self, report: &FailureReport) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_sink_writes_one_line_per_report() {
        let sink = JsonlSink::new(Vec::new());
        sink.report(&FailureReport::new(
            Some("0123456789abcdef01234567".into()),
            TaskState::Deriving,
            1,
            false,
            "Decode error",
        ));
        sink.report(&FailureReport::new(None, TaskState::Fetching, 3, true, "x"));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["photoId"], "0123456789abcdef01234567");
        assert_eq!(first["state"], "DERIVING");
        assert_eq!(first["escalated"], false);
        assert!(first["reportedAt"].as_u64().unwrap() > 0);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["photoId"].is_null());
        assert_eq!(second["attempt"], 3);
    }

    /// A writer the test can inspect while the sink still owns it.
    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_jsonl_sink_defers_writes_until_flush() {
        let buf = SharedBuf::default();
        let sink = JsonlSink::new(buf.clone());
        sink.report(&FailureReport::new(None, TaskState::Storing, 5, true, "gave up"));
        assert!(lock(&buf.0).is_empty());

        sink.flush();
        let output = String::from_utf8(lock(&buf.0).clone()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.ends_with('\n'));

        // Nothing pending: a second flush writes nothing more.
        sink.flush();
        assert_eq!(lock(&buf.0).len(), output.len());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());
        sink.report(&FailureReport::new(None, TaskState::Fetching, 1, false, "bad"));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.reports()[0].error, "bad");
    }
}
