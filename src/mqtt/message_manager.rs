use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::ui::RenderSink;

pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Direction/kind of a log line, drives styling in the log panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogDirection {
    Incoming,
    Outgoing,
    Info,
    Success,
    Warning,
    Error,
}

impl LogDirection {
    pub fn css_class(&self) -> &'static str {
        match self {
            LogDirection::Incoming => "incoming",
            LogDirection::Outgoing => "outgoing",
            LogDirection::Info => "info",
            LogDirection::Success => "success",
            LogDirection::Warning => "warning",
            LogDirection::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub direction: LogDirection,
    pub text: String,
}

impl LogEntry {
    pub fn now(direction: LogDirection, text: impl Into<String>) -> Self {
        LogEntry {
            timestamp: Local::now(),
            direction,
            text: text.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Message as delivered by the broker, stamped on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: String) -> Self {
        InboundMessage {
            topic,
            payload,
            received_at: Local::now(),
        }
    }

    pub fn time_label(&self) -> String {
        self.received_at.format("%H:%M:%S").to_string()
    }
}

/// Append-only log with a bounded on-screen length.
///
/// Every append is forwarded to the render sink. Once `capacity` entries are held
/// the oldest one is evicted.
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    sink: Arc<dyn RenderSink>,
}

impl MessageLog {
    pub fn new(capacity: usize, sink: Arc<dyn RenderSink>) -> Self {
        let capacity = capacity.max(1);
        MessageLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            sink,
        }
    }

    pub fn push(&mut self, direction: LogDirection, text: impl Into<String>) {
        let entry = LogEntry::now(direction, text);
        self.sink.append_log_line(&entry.render(), direction);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sink.clear_log();
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, direction: LogDirection) -> usize {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .count()
    }
}
