//! Stream/topic administrator: idempotent create/delete (spec §4.5).

use crate::adapter::BackendAdapter;
use crate::config::{BackendMode, RetentionPolicy, StorageKind, StreamDescriptor};
use crate::error::PubSubError;
use std::sync::Arc;
use std::time::Duration;

/// Name reserved for the engine's own bookkeeping stream, tuned for
/// long-lived retention rather than the caller's own stream settings
/// (spec §4.5, §11).
pub const RESERVED_MIGRATIONS_STREAM: &str = "pubsub_migrations";

/// Substrings folded into success by [`Administrator::create_stream`] and
/// [`Administrator::delete_stream`] respectively — "already exists" and
/// "not found" are not failures from this layer's perspective.
const ALREADY_EXISTS_SUBSTRINGS: [&str; 2] = ["already exists", "stream name already in use"];
const NOT_FOUND_SUBSTRINGS: [&str; 2] = ["not found", "no such stream"];
const GROUP_BUSY_SUBSTRINGS: [&str; 1] = ["busygroup"];

fn contains_any(reason: &str, needles: &[&str]) -> bool {
    let lower = reason.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Tuned [`StreamDescriptor`] for [`RESERVED_MIGRATIONS_STREAM`]: file
/// storage, limits retention, a long max-age, and a generous max-bytes
/// ceiling, independent of whatever the caller's own stream is configured
/// with (spec §4.5).
#[must_use]
pub fn reserved_migrations_descriptor() -> StreamDescriptor {
    StreamDescriptor {
        name: RESERVED_MIGRATIONS_STREAM.to_string(),
        subjects: vec![format!("{RESERVED_MIGRATIONS_STREAM}.*")],
        max_deliver: 1,
        max_age: Duration::from_secs(365 * 24 * 60 * 60),
        max_bytes: 1024 * 1024 * 1024,
        storage: StorageKind::File,
        retention: RetentionPolicy::Limits,
    }
}

/// Idempotent stream/topic/consumer-group administration surface.
pub struct Administrator {
    adapter: Arc<dyn BackendAdapter>,
    backend_mode: BackendMode,
}

impl Administrator {
    /// Build an administrator around an adapter and the configured mode.
    #[must_use]
    pub const fn new(adapter: Arc<dyn BackendAdapter>, backend_mode: BackendMode) -> Self {
        Self { adapter, backend_mode }
    }

    /// Create (or confirm the existence of) a stream. "Already exists" is
    /// folded into success.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if `descriptor` fails
    /// validation, otherwise the adapter's error verbatim unless it
    /// matches the already-exists vocabulary.
    pub async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), PubSubError> {
        descriptor.validate()?;
        match self.adapter.create_stream(descriptor).await {
            Ok(()) => Ok(()),
            Err(err) if contains_any(&err.to_string(), &ALREADY_EXISTS_SUBSTRINGS) => {
                tracing::debug!(stream = %descriptor.name, "stream already exists; treating as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete a stream. "Not found" is folded into success.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error verbatim unless it matches the
    /// not-found vocabulary.
    pub async fn delete_stream(&self, name: &str) -> Result<(), PubSubError> {
        match self.adapter.delete_stream(name).await {
            Ok(()) => Ok(()),
            Err(err) if contains_any(&err.to_string(), &NOT_FOUND_SUBSTRINGS) => {
                tracing::debug!(stream = name, "stream already absent; treating as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Create the stream if absent, or accept it as-is if it already
    /// exists — same semantics as [`Administrator::create_stream`], named
    /// separately to match the distinct call site in the facade (spec
    /// §4.5 `CreateOrUpdateStream`).
    ///
    /// # Errors
    ///
    /// See [`Administrator::create_stream`].
    pub async fn create_or_update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), PubSubError> {
        self.create_stream(descriptor).await
    }

    /// Ensure `name` exists as a topic for the configured backend mode.
    /// In channel mode this is a no-op (channels are auto-created by the
    /// broker on first publish/subscribe); in stream modes it creates the
    /// stream and folds `BUSYGROUP`-style errors into success.
    ///
    /// # Errors
    ///
    /// See [`Administrator::create_stream`].
    pub async fn create_topic(&self, descriptor: &StreamDescriptor) -> Result<(), PubSubError> {
        if self.backend_mode == BackendMode::RedisChannel {
            return Ok(());
        }
        match self.create_stream(descriptor).await {
            Ok(()) => Ok(()),
            Err(err) if contains_any(&err.to_string(), &GROUP_BUSY_SUBSTRINGS) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Delete `name` as a topic. Delegates to
    /// [`Administrator::delete_stream`] in durable modes; a no-op in
    /// channel mode.
    ///
    /// # Errors
    ///
    /// See [`Administrator::delete_stream`].
    pub async fn delete_topic(&self, name: &str) -> Result<(), PubSubError> {
        if self.backend_mode == BackendMode::RedisChannel {
            return Ok(());
        }
        self.delete_stream(name).await
    }

    /// Best-effort deletion of a single durable consumer. Failures are
    /// logged, never propagated (spec §4.5 deletion is advisory cleanup,
    /// not a correctness requirement — the broker reaps idle consumers on
    /// its own schedule).
    pub async fn delete_consumer(&self, group: &str, instance: &str) {
        if let Err(err) = self.adapter.delete_consumer(group, instance).await {
            tracing::warn!(group, instance, error = %err, "best-effort consumer delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AccountInfo, AckToken, ConsumerSpec, Record};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    struct ScriptedAdapter {
        create_stream_error: Option<String>,
        delete_stream_error: Option<String>,
        delete_consumer_calls: AtomicU32,
    }

    impl BackendAdapter for ScriptedAdapter {
        fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn ping(&self) -> BoxFuture<'_, bool> {
            Box::pin(async { true })
        }
        fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn publish(&self, _subject: &str, _payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn create_or_update_consumer(&self, _spec: ConsumerSpec) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn fetch(
            &self,
            _topic: &str,
            _max: u32,
            _max_wait: Duration,
            _replay: bool,
        ) -> BoxFuture<'_, Result<Vec<Record>, PubSubError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn ack(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn nak(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn create_stream(&self, _descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
            let err = self.create_stream_error.clone();
            Box::pin(async move {
                match err {
                    None => Ok(()),
                    Some(reason) => Err(PubSubError::AdminFailed(reason)),
                }
            })
        }
        fn delete_stream(&self, _name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
            let err = self.delete_stream_error.clone();
            Box::pin(async move {
                match err {
                    None => Ok(()),
                    Some(reason) => Err(PubSubError::AdminFailed(reason)),
                }
            })
        }
        fn delete_consumer(&self, _group: &str, _instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
            self.delete_consumer_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
            Box::pin(async { Ok(AccountInfo { detail: String::new() }) })
        }
    }

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor {
            name: "orders".into(),
            subjects: vec!["orders".into()],
            max_deliver: 5,
            max_age: Duration::from_secs(0),
            max_bytes: 0,
            storage: StorageKind::File,
            retention: RetentionPolicy::Limits,
        }
    }

    #[tokio::test]
    async fn create_stream_folds_already_exists_into_success() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: Some("stream name already in use".into()),
            delete_stream_error: None,
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter, BackendMode::JetStream);

        assert!(admin.create_stream(&descriptor()).await.is_ok());
    }

    #[tokio::test]
    async fn create_stream_propagates_other_errors() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: Some("disk full".into()),
            delete_stream_error: None,
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter, BackendMode::JetStream);

        assert!(admin.create_stream(&descriptor()).await.is_err());
    }

    #[tokio::test]
    async fn delete_stream_folds_not_found_into_success() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: None,
            delete_stream_error: Some("stream not found".into()),
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter, BackendMode::JetStream);

        assert!(admin.delete_stream("orders").await.is_ok());
    }

    #[tokio::test]
    async fn create_topic_is_a_noop_in_channel_mode() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: Some("disk full".into()),
            delete_stream_error: None,
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter, BackendMode::RedisChannel);

        assert!(admin.create_topic(&descriptor()).await.is_ok());
    }

    #[tokio::test]
    async fn create_topic_folds_busygroup_into_success() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: Some("BUSYGROUP Consumer Group name already exists".into()),
            delete_stream_error: None,
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter, BackendMode::RedisStream);

        assert!(admin.create_topic(&descriptor()).await.is_ok());
    }

    #[tokio::test]
    async fn delete_consumer_is_best_effort_and_never_returns_an_error() {
        let adapter = Arc::new(ScriptedAdapter {
            create_stream_error: None,
            delete_stream_error: None,
            delete_consumer_calls: AtomicU32::new(0),
        });
        let admin = Administrator::new(adapter.clone(), BackendMode::JetStream);

        admin.delete_consumer("billing", "inst-1").await;

        assert_eq!(adapter.delete_consumer_calls.load(Ordering::SeqCst), 1);
    }
}
