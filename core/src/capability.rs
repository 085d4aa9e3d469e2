//! Late-binding capability traits for logger/metrics/tracer injection.
//!
//! The host framework's logger, metrics, and tracer are external
//! collaborators (spec §1); the engine only needs a narrow surface from
//! each. `UseLogger`/`UseMetrics`/`UseTracer` (spec §6) accept anything that
//! implements the matching trait here and otherwise leave the slot at its
//! no-op default. Internal `tracing` instrumentation runs regardless of
//! whether a capability is bound — see `SPEC_FULL.md` §10.1.

use std::fmt;

/// Severity for [`Logger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail, not actionable on its own.
    Debug,
    /// Routine operational event.
    Info,
    /// Recoverable anomaly (dropped message, retried ack).
    Warn,
    /// A user-visible failure.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Host-framework logger capability.
pub trait Logger: Send + Sync {
    /// Emit one log line at the given level.
    fn log(&self, level: LogLevel, message: &str);
}

/// Host-framework metrics capability.
///
/// Matches the counters spec §6 names: a name plus an unordered set of
/// label key/value pairs.
pub trait Metrics: Send + Sync {
    /// Increment a named counter by one, with the given labels.
    fn increment(&self, name: &str, labels: &[(&str, &str)]);
}

/// Host-framework distributed-tracing capability.
///
/// Deliberately minimal: the engine only needs to bracket an operation,
/// not to build a full span tree. Span creation proper is handled by
/// `tracing::instrument` on the Facade regardless of whether this
/// capability is bound (spec §1 scopes the tracer backend itself out, not
/// ambient span emission).
pub trait Tracer: Send + Sync {
    /// Called when a traced operation begins; returns an opaque token
    /// passed back to `end_span`.
    fn start_span(&self, name: &str) -> u64;
    /// Called when the operation named by `start_span` completes.
    fn end_span(&self, token: u64);
}

/// No-op [`Logger`] used until `UseLogger` binds a real implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// No-op [`Metrics`] used until `UseMetrics` binds a real implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}
}

/// No-op [`Tracer`] used until `UseTracer` binds a real implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> u64 {
        0
    }
    fn end_span(&self, _token: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_capabilities_are_inert() {
        NoopLogger.log(LogLevel::Info, "hello");
        NoopMetrics.increment("x", &[]);
        let token = NoopTracer.start_span("op");
        NoopTracer.end_span(token);
    }
}
