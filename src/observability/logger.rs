//! Structured logging
//!
//! One JSON object per line. The event name, severity and timestamp
//! lead every line; caller fields follow, sorted by key. Quoting is
//! delegated to serde_json so string escaping stays consistent with
//! every other artifact the store serializes. Lines are written
//! synchronously in a single call, no buffering.

use std::fmt;
use std::io::{self, Write};

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured logger that writes one JSON line per event.
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and fields.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = render_line(severity, event, fields);
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = handle.write_all(line.as_bytes());
    }
}

/// Render a JSON string literal, escaping included.
fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

/// Assemble one log line: pinned header pairs, then fields by key.
fn render_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let header = [
        ("event", event),
        ("severity", severity.as_str()),
        ("ts", timestamp.as_str()),
    ];

    let mut sorted: Vec<(&str, &str)> = fields.to_vec();
    sorted.sort_by_key(|(key, _)| *key);

    let pairs: Vec<String> = header
        .iter()
        .chain(sorted.iter())
        .map(|(key, value)| format!("{}:{}", quote(key), quote(value)))
        .collect();
    format!("{{{}}}\n", pairs.join(","))
}
