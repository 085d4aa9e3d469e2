//! Shared runtime utilities for the pub/sub crate family.
//!
//! The facade reaches for [`metrics`] to stand up a Prometheus exporter and
//! bind a [`pubsub_core::capability::Metrics`] implementation onto the
//! engine. Reconnect backoff and ack retry both live directly in
//! `pubsub-core` (the connection supervisor's reconnect loop, the
//! committer's retry), so this crate carries no generic retry helper.

pub mod metrics;
