//! Engine configuration — immutable once constructed (spec data model §3).

use crate::error::PubSubError;
use std::time::Duration;

/// Which broker backend the engine is wired against.
///
/// Exactly one mode is active per [`EngineConfig`]; stream mode is the
/// default when the backend supports both (Redis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// JetStream-style durable, acknowledged, consumer-group log broker.
    JetStream,
    /// Redis fire-and-forget pub/sub channels. No durability, no groups.
    RedisChannel,
    /// Redis streams with consumer groups, PEL recovery, and trimming.
    RedisStream,
}

impl BackendMode {
    /// True for modes that offer a durable, acknowledged consumer group
    /// (jetstream, redis-stream); false for the ephemeral channel mode.
    #[must_use]
    pub const fn is_durable(self) -> bool {
        !matches!(self, Self::RedisChannel)
    }
}

/// Storage medium backing a stream (jetstream / redis-stream only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Persisted to disk.
    File,
    /// Kept in memory only; lost on broker restart.
    Memory,
}

/// Retention policy governing when the broker may discard stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Discard once `max_age`/`max_bytes`/`max_deliver` limits are hit.
    Limits,
    /// Discard once every known consumer has acked a message.
    Interest,
    /// Each message is delivered to exactly one consumer and removed.
    WorkQueue,
}

/// Shape of a stream/topic as the Administrator will create or update it.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Stream (or key prefix) name.
    pub name: String,
    /// Subjects/patterns the stream captures. Must be non-empty.
    pub subjects: Vec<String>,
    /// Maximum delivery attempts before a message is considered
    /// undeliverable.
    pub max_deliver: i64,
    /// Maximum age of a message before the broker may discard it.
    pub max_age: Duration,
    /// Maximum total size of the stream in bytes (0 = unbounded).
    pub max_bytes: i64,
    /// Storage medium.
    pub storage: StorageKind,
    /// Retention policy.
    pub retention: RetentionPolicy,
}

impl StreamDescriptor {
    /// Validate the non-empty-subjects invariant.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if `name` or `subjects` is
    /// empty.
    pub fn validate(&self) -> Result<(), PubSubError> {
        if self.name.is_empty() {
            return Err(PubSubError::ConfigInvalid("stream name empty".into()));
        }
        if self.subjects.is_empty() {
            return Err(PubSubError::ConfigInvalid(
                "stream subjects must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

/// Immutable engine configuration (spec §3 `EngineConfig`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Broker server address(es).
    pub server: String,
    /// Optional reference to a credentials file/secret (interpretation is
    /// backend-specific).
    pub credentials: Option<String>,
    /// Optional TLS material reference (paths; loading itself is an
    /// external collaborator, see spec §1).
    pub tls: Option<TlsConfig>,
    /// Which backend/mode this configuration targets.
    pub backend_mode: BackendMode,
    /// Stream descriptor (jetstream / redis-stream).
    pub stream: StreamDescriptor,
    /// Consumer-group base name. Required for any durable mode.
    pub consumer_group: Option<String>,
    /// Consumer-instance name. If absent, derived deterministically at
    /// `Engine::connect` time and held stable for the process lifetime.
    pub consumer_instance: Option<String>,
    /// Maximum messages requested per fetch.
    pub batch_size: u32,
    /// Maximum time a fetch will wait for at least one message.
    pub max_wait: Duration,
    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Per-topic in-memory buffer capacity.
    pub buffer_size: usize,
    /// Default timeout for `Query` when the caller does not override it.
    pub query_timeout: Duration,
    /// Default limit for `Query` when the caller does not override it.
    pub query_limit: usize,
    /// Reconnect / error-backoff base interval.
    pub retry_interval: Duration,
}

/// TLS material reference. Loading the referenced files is an external
/// collaborator (spec §1); this struct only carries the paths.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the CA certificate.
    pub ca_cert: Option<String>,
    /// Path to the client certificate.
    pub cert: Option<String>,
    /// Path to the client key.
    pub key: Option<String>,
}

impl EngineConfig {
    /// Validate the invariants `Connect` checks before attempting to reach
    /// the broker: non-empty server, non-empty stream subjects, and a
    /// configured consumer-group in durable modes.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] for any violation.
    pub fn validate(&self) -> Result<(), PubSubError> {
        if self.server.is_empty() {
            return Err(PubSubError::ConfigInvalid("server address empty".into()));
        }
        self.stream.validate()?;
        if self.backend_mode.is_durable()
            && self
                .consumer_group
                .as_ref()
                .is_none_or(String::is_empty)
        {
            return Err(PubSubError::ConfigInvalid(
                "consumer group required in durable mode".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(PubSubError::ConfigInvalid("batch size must be >= 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(PubSubError::ConfigInvalid("buffer size must be >= 1".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            credentials: None,
            tls: None,
            backend_mode: BackendMode::RedisStream,
            stream: StreamDescriptor {
                name: String::new(),
                subjects: Vec::new(),
                max_deliver: 5,
                max_age: Duration::from_secs(0),
                max_bytes: 0,
                storage: StorageKind::File,
                retention: RetentionPolicy::Limits,
            },
            consumer_group: None,
            consumer_instance: None,
            batch_size: 100,
            max_wait: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            buffer_size: 100,
            query_timeout: Duration::from_secs(5),
            query_limit: 10,
            retry_interval: Duration::from_secs(10),
        }
    }
}
