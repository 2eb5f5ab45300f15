//! Observability port.
//!
//! Components never log through a global; they receive a `&dyn Reporter` at
//! construction. [`TracingReporter`] forwards to `tracing`, which the binary
//! wires to a subscriber. Libraries embedding the helper can supply their own.

use tracing::Level;

/// Sink for progress and diagnostic messages emitted during a run.
pub trait Reporter {
    fn event(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.event(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.event(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.event(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.event(Level::ERROR, message);
    }
}

/// Forwards every event to the `tracing` macros under one target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn event(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "gitlab_helper", "{message}"),
            Level::WARN => tracing::warn!(target: "gitlab_helper", "{message}"),
            Level::INFO => tracing::info!(target: "gitlab_helper", "{message}"),
            Level::DEBUG => tracing::debug!(target: "gitlab_helper", "{message}"),
            _ => tracing::trace!(target: "gitlab_helper", "{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn event(&self, _level: Level, _message: &str) {}
}
