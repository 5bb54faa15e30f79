//! Injectable log sink used by runners and drainers

use std::sync::Arc;

/// Source of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Sink for the engine's own diagnostics
///
/// Implementations must be cheap to call from several threads at once: one
/// handle's runner and both of its drainers share the same sink.
pub trait Logger: Send + Sync {
    /// Low-level detail, such as which spawn options were applied
    fn debug(&self, message: &str);
    /// Invocation lifecycle
    fn info(&self, message: &str);
    /// Recoverable anomalies, such as a stream closed mid-read
    fn warn(&self, message: &str);
    /// Failures captured into a result
    fn error(&self, message: &str);
}

/// Shared logger reference handed to runners and drainers
pub type SharedLogger = Arc<dyn Logger>;

/// A logger that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// A logger that forwards to `tracing` under the `command_runner` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "command_runner", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "command_runner", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "command_runner", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "command_runner", "{}", message);
    }
}

/// The default sink: logging disabled
pub fn no_op() -> SharedLogger {
    Arc::new(NoOpLogger)
}
