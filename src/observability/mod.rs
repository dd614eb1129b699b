//! Observability
//!
//! Synchronous structured logging with a closed event vocabulary.

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log an event at info level.
pub fn info(event: Event, fields: &[(&str, &str)]) {
    Logger::log(Severity::Info, event.as_str(), fields);
}

/// Log an event at warn level.
pub fn warn(event: Event, fields: &[(&str, &str)]) {
    Logger::log(Severity::Warn, event.as_str(), fields);
}

/// Log an event at error level.
pub fn error(event: Event, fields: &[(&str, &str)]) {
    Logger::log(Severity::Error, event.as_str(), fields);
}
