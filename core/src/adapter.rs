//! The backend adapter capability set (spec §4.6).
//!
//! The rest of the core programs against [`BackendAdapter`] and never names
//! a concrete backend. Each variant (jetstream, redis-channel, redis-stream)
//! lives in its own crate and implements this trait.
//!
//! # Dyn compatibility
//!
//! Like the teacher workspace's `EventBus` trait, methods return
//! `Pin<Box<dyn Future>>` explicitly rather than using `async fn`, so the
//! engine can hold `Arc<dyn BackendAdapter>` trait objects.

use crate::config::StreamDescriptor;
use crate::error::PubSubError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A single delivered record, not yet surfaced to the application as a
/// [`crate::message::Message`].
#[derive(Debug, Clone)]
pub struct Record {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Metadata headers; unordered, possibly multi-valued.
    pub headers: HashMap<String, Vec<String>>,
    /// Opaque handle the adapter needs to ack/nak exactly this delivery.
    pub ack_token: AckToken,
}

/// Opaque per-delivery handle threaded back through `ack`/`nak`. Adapters
/// stuff whatever they need (stream name + sequence, Redis stream ID, …)
/// into the `backend` field; the core never inspects it.
#[derive(Debug, Clone)]
pub struct AckToken {
    /// Backend-defined opaque identifier for this delivery.
    pub backend: String,
}

/// Policy governing where a newly created durable consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Start from the next message published after consumer creation.
    New,
    /// Deliver every retained message from the start of the stream.
    All,
}

/// Parameters for creating or updating a durable consumer.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Consumer-group name.
    pub group: String,
    /// Consumer-instance name.
    pub instance: String,
    /// Subject/key filter (normally the topic itself).
    pub filter: String,
    /// Where to start reading for a newly created consumer.
    pub deliver_policy: DeliverPolicy,
    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Maximum delivery attempts before the broker gives up.
    pub max_deliver: i64,
}

/// Account-level health probe response (spec §4.6 `account-info`).
#[derive(Debug, Clone)]
pub struct AccountInfo {
    /// Free-form diagnostic string from the backend (version, memory, …).
    pub detail: String,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability set every backend adapter must provide.
pub trait BackendAdapter: Send + Sync {
    /// Establish the connection and higher-level context.
    fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Lightweight liveness probe with an internal deadline.
    fn ping(&self) -> BoxFuture<'_, bool>;

    /// Best-effort graceful teardown. Idempotent.
    fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Publish a payload to a subject/topic.
    fn publish(&self, subject: &str, payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Create or update a durable consumer per `spec`. No-op / returns
    /// immediately in ephemeral (redis-channel) mode.
    fn create_or_update_consumer(
        &self,
        spec: ConsumerSpec,
    ) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Pull up to `max` records, waiting at most `max_wait` for the first
    /// one to arrive.
    ///
    /// `replay` is meaningful only in redis-stream mode: when `true`, read
    /// the consumer's own pending-entries list (id `"0"`) instead of new
    /// messages (id `">"`), implementing PEL recovery (spec §4.2). Other
    /// backends ignore it.
    fn fetch(
        &self,
        topic: &str,
        max: u32,
        max_wait: Duration,
        replay: bool,
    ) -> BoxFuture<'_, Result<Vec<Record>, PubSubError>>;

    /// Positively acknowledge a delivery.
    fn ack(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Negatively acknowledge a delivery, requesting redelivery.
    fn nak(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Idempotent stream creation. "Already exists" is folded into
    /// success by the implementation.
    fn create_stream(&self, descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Idempotent stream deletion. "Not found" is folded into success by
    /// the implementation.
    fn delete_stream(&self, name: &str) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Delete a single durable consumer. Best-effort.
    fn delete_consumer(&self, group: &str, instance: &str) -> BoxFuture<'_, Result<(), PubSubError>>;

    /// Account-level probe used only by the health reporter.
    fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>>;
}
