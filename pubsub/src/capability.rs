//! Swappable capability slots backing the Facade's `use_logger`/
//! `use_metrics`/`use_tracer` setters (spec §6, §10.1/§10.5/§10.6).
//!
//! The connection supervisor and subscription manager are constructed once,
//! around these shared handles, before the host container has had a chance
//! to call a setter. Each slot starts at its no-op default and can be
//! rebound later without reconstructing the engine.

use pubsub_core::capability::{Logger, Metrics, NoopLogger, NoopMetrics, NoopTracer, Tracer};
use pubsub_core::LogLevel;
use std::sync::{Arc, RwLock};

/// [`Metrics`] that forwards to whatever was last bound via `use_metrics`,
/// defaulting to [`NoopMetrics`]. Passed directly into
/// `ConnectionSupervisor`/`SubscriptionManager` as `Arc<dyn Metrics>` so a
/// later rebind is visible to code already holding that `Arc`.
pub struct SharedMetrics(RwLock<Arc<dyn Metrics>>);

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(RwLock::new(Arc::new(NoopMetrics)))
    }
}

impl SharedMetrics {
    /// Rebind the forwarding target.
    pub fn set(&self, metrics: Arc<dyn Metrics>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = metrics;
        }
    }
}

impl Metrics for SharedMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        if let Ok(slot) = self.0.read() {
            slot.increment(name, labels);
        }
    }
}

/// [`Logger`] that forwards to whatever was last bound via `use_logger`.
/// Nothing in `pubsub-core` consumes this directly; the Facade calls it
/// alongside its own `tracing` instrumentation (spec §10.1).
pub struct SharedLogger(RwLock<Arc<dyn Logger>>);

impl Default for SharedLogger {
    fn default() -> Self {
        Self(RwLock::new(Arc::new(NoopLogger)))
    }
}

impl SharedLogger {
    /// Rebind the forwarding target.
    pub fn set(&self, logger: Arc<dyn Logger>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = logger;
        }
    }

    /// Emit one log line through the currently bound logger.
    pub fn log(&self, level: LogLevel, message: &str) {
        if let Ok(slot) = self.0.read() {
            slot.log(level, message);
        }
    }
}

/// [`Tracer`] that forwards to whatever was last bound via `use_tracer`.
/// Complements, rather than replaces, the `tracing::instrument` spans on
/// the Facade's own methods (spec §10.6).
pub struct SharedTracer(RwLock<Arc<dyn Tracer>>);

impl Default for SharedTracer {
    fn default() -> Self {
        Self(RwLock::new(Arc::new(NoopTracer)))
    }
}

impl SharedTracer {
    /// Rebind the forwarding target.
    pub fn set(&self, tracer: Arc<dyn Tracer>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = tracer;
        }
    }

    /// Start a span through the currently bound tracer.
    pub fn start_span(&self, name: &str) -> u64 {
        self.0.read().map_or(0, |slot| slot.start_span(name))
    }

    /// End a span through the currently bound tracer.
    pub fn end_span(&self, token: u64) {
        if let Ok(slot) = self.0.read() {
            slot.end_span(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingMetrics(AtomicU32);

    impl Metrics for CountingMetrics {
        fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn shared_metrics_forwards_to_the_rebound_target() {
        let shared = SharedMetrics::default();
        shared.increment("x", &[]); // swallowed by the noop default

        let counting = Arc::new(CountingMetrics(AtomicU32::new(0)));
        shared.set(counting.clone());
        shared.increment("x", &[]);

        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
