//! Logging collaborator for `log` actions.

use serde_json::Value;

/// Sink for values emitted by `log` actions.
pub trait Logger: Send + Sync {
    fn log(&self, label: Option<&str>, value: &Value);
}

/// Default logger: routes through `tracing` at info level.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, label: Option<&str>, value: &Value) {
        match label {
            Some(label) => tracing::info!(target: "lattice", "{label}: {value}"),
            None => tracing::info!(target: "lattice", "{value}"),
        }
    }
}
