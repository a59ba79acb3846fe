//! Human-readable status stream.
//!
//! Every significant pipeline event becomes one [`LogRecord`] appended to a
//! [`LogSink`]. Sinks are shared by the orchestrator, the engine supervisor
//! and both workers, so appends must be safe from any task. Each record is
//! also mirrored to `tracing` under the `kstreams::status` target.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One timestamped status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Append-only destination for status lines.
pub trait LogSink: Send + Sync {
    fn append(&self, record: LogRecord);
}

/// Writes each record to stdout on its own line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn append(&self, record: LogRecord) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "{}", record);
    }
}

/// Forwards records to a UI task through an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn append(&self, record: LogRecord) {
        // Receiver gone means the UI has closed; nothing left to show the line to.
        let _ = self.tx.send(record);
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records.lock().iter().any(|r| r.message.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message.contains(needle))
            .count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == LogLevel::Error)
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn append(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Cloneable handle used by pipeline components to emit status lines.
#[derive(Clone)]
pub struct PipelineLog {
    sink: Arc<dyn LogSink>,
}

impl PipelineLog {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    fn emit(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!(target: "kstreams::status", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "kstreams::status", "{}", message),
            LogLevel::Error => tracing::error!(target: "kstreams::status", "{}", message),
        }
        self.sink.append(LogRecord::new(level, message));
    }
}

impl fmt::Debug for PipelineLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineLog").finish_non_exhaustive()
    }
}
