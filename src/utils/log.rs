//! Simple logging module.
//!
//! Leveled stderr logging with an optional per-component identifier,
//! used by the miner threads and the dataset initializer. The hot
//! paths (interpreter, per-nonce loop) never log.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Initialize the logger with the given level.
pub fn init(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns true if the given level should be logged.
#[inline]
fn enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Internal logging function with optional identifier prefix.
fn log_with_id(level: Level, id: Option<&str>, message: &str) {
    if !enabled(level) {
        return;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let hours = (secs / 3600) % 24;
    let mins = (secs / 60) % 60;
    let s = secs % 60;
    let millis = now.subsec_millis();
    match id {
        Some(id) => eprintln!(
            "{:02}:{:02}:{:02}.{:03} [{:5}] [{}] {}",
            hours, mins, s, millis, level, id, message
        ),
        None => eprintln!(
            "{:02}:{:02}:{:02}.{:03} [{:5}] {}",
            hours, mins, s, millis, level, message
        ),
    }
}

/// Logs an info-level message without a component prefix.
pub fn info(message: &str) {
    log_with_id(Level::Info, None, message);
}

/// Logs an error-level message without a component prefix.
pub fn error(message: &str) {
    log_with_id(Level::Error, None, message);
}

/// Thread-safe logger instance with an identifier prefix.
///
/// Each logger instance carries an ID that is prepended to all log
/// messages, allowing differentiation between worker threads.
#[derive(Clone)]
pub struct Logger {
    pub id: Arc<str>,
}

impl Logger {
    /// Creates a new logger with the given identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }

    /// Logs an info-level message.
    pub fn info(&self, message: &str) {
        log_with_id(Level::Info, Some(&self.id), message);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: &str) {
        log_with_id(Level::Warn, Some(&self.id), message);
    }

    /// Logs an error-level message.
    pub fn error(&self, message: &str) {
        log_with_id(Level::Error, Some(&self.id), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_display() {
        assert_eq!(format!("{}", Level::Info), "INFO");
        assert_eq!(format!("{}", Level::Warn), "WARN");
        assert_eq!(format!("{}", Level::Error), "ERROR");
    }

    #[test]
    fn enabled_respects_level() {
        init(Level::Warn);

        assert!(!enabled(Level::Info));
        assert!(enabled(Level::Warn));
        assert!(enabled(Level::Error));

        // Reset to default for other tests
        init(Level::Info);
    }

    #[test]
    fn logger_clone_shares_id() {
        let a = Logger::new("vm-0");
        let b = a.clone();
        assert_eq!(a.id, b.id);
        b.info("still works");
    }
}
