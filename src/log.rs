//! Operator-facing diagnostics.
//!
//! The pool reports what it is doing through two channels: structured
//! [`tracing`] events (always on, pool name attached as a field) and an
//! optional [`LogSink`] callback configured per pool. The sink receives the
//! same messages with a [`LogLevel`], matching the four severities the pool
//! distinguishes.

use std::fmt;
use std::sync::Arc;

/// Severity of a pool diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Per-event chatter: dispense passes, creations, reap decisions.
    Verbose,
    /// Lifecycle milestones: drain start/completion, forced destruction.
    Info,
    /// Recoverable anomalies: acquire timeouts.
    Warn,
    /// Programming errors observed at the API boundary and factory failures.
    Error,
}

/// Callback sink for pool diagnostics.
///
/// The callback is invoked synchronously while the pool is doing work; it
/// must be cheap and must not call back into the pool.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(LogLevel, &str) + Send + Sync>);

impl LogSink {
    /// Wrap a callback as a log sink.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub(crate) fn emit(&self, level: LogLevel, message: &str) {
        (self.0)(level, message);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}
