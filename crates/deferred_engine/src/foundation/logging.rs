//! Logging utilities
//!
//! Render components never reach for a process-wide logger on their own. Each one
//! is handed a [`RenderLog`] when it is constructed and reports through it. The
//! default sink forwards to the `log` facade, so `env_logger` filtering applies
//! as usual.

use std::fmt;
use std::sync::{Arc, Mutex};

pub use log::{debug, error, info, trace, warn, Level};

/// Destination for records emitted through a [`RenderLog`]
pub trait LogSink: Send + Sync {
    /// Write one record
    fn write(&self, level: Level, target: &str, message: &str);

    /// Surface an unrecoverable error to the user before the process exits.
    ///
    /// Called after the error record is written. Blocking here, e.g. on a modal
    /// dialog, holds off the exit.
    fn alert(&self, _target: &str, _message: &str) {}
}

/// Sink that forwards every record to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn write(&self, level: Level, target: &str, message: &str) {
        log::log!(target: target, level, "{}", message);
    }
}

/// Sink that keeps records in memory, mostly useful in tests
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Level, String)>>,
    alerts: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of records at exactly `level`
    pub fn count(&self, level: Level) -> usize {
        self.records().iter().filter(|(l, _)| *l == level).count()
    }

    /// Fatal errors raised through [`LogSink::alert`]
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().map(|alerts| alerts.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: Level, _target: &str, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_string()));
        }
    }

    fn alert(&self, _target: &str, message: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(message.to_string());
        }
    }
}

/// Cloneable logging handle injected into every render component
#[derive(Clone)]
pub struct RenderLog {
    sink: Arc<dyn LogSink>,
    target: &'static str,
}

impl RenderLog {
    /// Handle that writes into `sink`
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            target: "deferred_engine",
        }
    }

    /// Handle backed by the `log` facade
    pub fn facade() -> Self {
        Self::new(Arc::new(FacadeSink))
    }

    /// Same sink, different target label
    #[must_use]
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    /// Target label used for records from this handle
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Emit a record at `level`
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        self.sink.write(level, self.target, &message.to_string());
    }

    /// Error-level record
    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, message);
    }

    /// Warning-level record
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::Warn, message);
    }

    /// Info-level record
    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, message);
    }

    /// Debug-level record
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::Debug, message);
    }

    /// Trace-level record
    pub fn trace(&self, message: impl fmt::Display) {
        self.log(Level::Trace, message);
    }

    /// Log at error level and terminate the process.
    ///
    /// The sink's [`LogSink::alert`] runs before the exit, so a sink that shows a
    /// modal message keeps it on screen until dismissed. Reserved for the outermost
    /// caller. Library code returns errors instead.
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.report_fatal(message);
        std::process::exit(1);
    }

    /// Everything [`RenderLog::fatal`] does short of exiting
    pub fn report_fatal(&self, message: impl fmt::Display) {
        let message = message.to_string();
        self.sink.write(Level::Error, self.target, &format!("FATAL: {message}"));
        eprintln!("fatal error: {message}");
        self.sink.alert(self.target, &message);
    }
}

impl Default for RenderLog {
    fn default() -> Self {
        Self::facade()
    }
}

impl fmt::Debug for RenderLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLog").field("target", &self.target).finish()
    }
}

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter used when `RUST_LOG` is unset
pub fn init_with_level(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_levels() {
        let sink = Arc::new(MemorySink::new());
        let log = RenderLog::new(sink.clone());

        log.info("device selected");
        log.warn(format_args!("extent clamped to {}x{}", 800, 600));
        log.error("submit failed");
        log.debug("noise");

        assert_eq!(sink.count(Level::Info), 1);
        assert_eq!(sink.count(Level::Warn), 1);
        assert_eq!(sink.count(Level::Error), 1);
        assert_eq!(sink.count(Level::Debug), 1);

        let records = sink.records();
        assert_eq!(records[1].1, "extent clamped to 800x600");
    }

    #[test]
    fn test_cloned_handles_share_sink() {
        let sink = Arc::new(MemorySink::new());
        let log = RenderLog::new(sink.clone());
        let swapchain_log = log.with_target("swapchain");

        log.info("a");
        swapchain_log.info("b");

        assert_eq!(swapchain_log.target(), "swapchain");
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_fatal_report_logs_then_alerts() {
        let sink = Arc::new(MemorySink::new());
        let log = RenderLog::new(sink.clone());

        log.error("ordinary failure");
        assert!(sink.alerts().is_empty());

        log.report_fatal(format_args!("no device supports {}", "VK_KHR_swapchain"));
        assert_eq!(sink.count(Level::Error), 2);
        assert_eq!(sink.records()[1].1, "FATAL: no device supports VK_KHR_swapchain");
        assert_eq!(sink.alerts(), vec!["no device supports VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn test_facade_sink_alert_is_silent() {
        // sinks without a user-facing surface still log; the default hook does nothing
        FacadeSink.alert("deferred_engine", "ignored");
    }
}
