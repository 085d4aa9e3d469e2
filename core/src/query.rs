//! Bounded bulk read engine (spec §4.4).

use crate::adapter::BackendAdapter;
use crate::error::PubSubError;
use crate::supervisor::ConnectionSupervisor;
use std::sync::Arc;
use std::time::Duration;

/// Parameters accepted by [`QueryEngine::query`]; `None` falls back to the
/// engine's configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryArgs {
    /// Overrides the configured default query timeout.
    pub timeout: Option<Duration>,
    /// Overrides the configured default query limit. `Some(0)` is a
    /// legitimate request for zero messages, not an error.
    pub limit: Option<usize>,
}

/// Bounded read over a topic's recent history: enumerate up to `limit`
/// messages, ack each as it is consumed, and concatenate payloads with
/// `'\n'` (no trailing separator).
pub struct QueryEngine {
    adapter: Arc<dyn BackendAdapter>,
    supervisor: Arc<ConnectionSupervisor>,
    default_timeout: Duration,
    default_limit: usize,
}

impl QueryEngine {
    /// Build a query engine around an adapter, the supervisor that owns its
    /// connection state, and the engine's configured defaults.
    #[must_use]
    pub const fn new(
        adapter: Arc<dyn BackendAdapter>,
        supervisor: Arc<ConnectionSupervisor>,
        default_timeout: Duration,
        default_limit: usize,
    ) -> Self {
        Self {
            adapter,
            supervisor,
            default_timeout,
            default_limit,
        }
    }

    /// Run a bounded read against `topic`.
    ///
    /// An empty result is a legitimate outcome, not an error — in
    /// particular `limit == 0` always returns an empty buffer without
    /// contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::EmptyTopic`] if `topic` is empty,
    /// [`PubSubError::NotConnected`] if the engine is not currently
    /// connected, or the adapter's fetch error verbatim.
    pub async fn query(&self, topic: &str, args: QueryArgs) -> Result<Vec<u8>, PubSubError> {
        if topic.is_empty() {
            return Err(PubSubError::EmptyTopic);
        }
        if !self.supervisor.is_connected().await {
            return Err(PubSubError::NotConnected);
        }

        let limit = args.limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let timeout = args.timeout.unwrap_or(self.default_timeout);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut payloads: Vec<Vec<u8>> = Vec::new();

        #[allow(clippy::cast_possible_truncation)]
        while payloads.len() < limit {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let want = (limit - payloads.len()) as u32;
            let batch = self
                .adapter
                .fetch(topic, want, remaining, true)
                .await
                .map_err(|e| PubSubError::FetchFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;

            if batch.is_empty() {
                break;
            }

            for record in batch {
                if payloads.len() >= limit {
                    break;
                }
                self.adapter.ack(&record.ack_token).await.ok();
                payloads.push(record.payload);
            }
        }

        Ok(payloads.join(&b"\n"[..]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::{AccountInfo, AckToken, ConsumerSpec, Record};
    use crate::capability::NoopMetrics;
    use crate::config::StreamDescriptor;
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    struct FixedAdapter {
        batches: Mutex<Vec<Vec<Record>>>,
        ack_calls: AtomicU32,
    }

    impl BackendAdapter for FixedAdapter {
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
            let mut batches = self.batches.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let batch = if batches.is_empty() { Vec::new() } else { batches.remove(0) };
            Box::pin(async move { Ok(batch) })
        }
        fn ack(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            self.ack_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn nak(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn create_stream(&self, _descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn delete_stream(&self, _name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn delete_consumer(&self, _group: &str, _instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
            Box::pin(async { Ok(()) })
        }
        fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
            Box::pin(async { Ok(AccountInfo { detail: String::new() }) })
        }
    }

    fn rec(payload: &[u8]) -> Record {
        Record {
            payload: payload.to_vec(),
            headers: HashMap::new(),
            ack_token: AckToken { backend: "1".into() },
        }
    }

    /// Build an engine backed by a supervisor that has already completed
    /// its initial connect, so `query` sees `is_connected() == true`.
    async fn connected_engine(adapter: Arc<dyn BackendAdapter>, limit: usize) -> QueryEngine {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&adapter),
            Arc::new(NoopMetrics),
            Duration::from_secs(30),
        ));
        supervisor.connect().await.expect("connect");
        QueryEngine::new(adapter, supervisor, Duration::from_secs(1), limit)
    }

    #[tokio::test]
    async fn query_joins_payloads_with_newline() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(vec![vec![rec(b"a"), rec(b"b"), rec(b"c")]]),
            ack_calls: AtomicU32::new(0),
        });
        let engine = connected_engine(adapter.clone(), 10).await;

        let result = engine.query("t", QueryArgs::default()).await.unwrap();

        assert_eq!(result, b"a\nb\nc");
        assert_eq!(adapter.ack_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn query_respects_an_explicit_limit_below_available_records() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(vec![vec![rec(b"a"), rec(b"b"), rec(b"c")]]),
            ack_calls: AtomicU32::new(0),
        });
        let engine = connected_engine(adapter, 10).await;

        let result = engine
            .query("t", QueryArgs { timeout: None, limit: Some(2) })
            .await
            .unwrap();

        assert_eq!(result, b"a\nb");
    }

    #[tokio::test]
    async fn query_with_limit_zero_returns_empty_without_calling_the_adapter() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(vec![vec![rec(b"a")]]),
            ack_calls: AtomicU32::new(0),
        });
        let engine = connected_engine(adapter.clone(), 10).await;

        let result = engine
            .query("t", QueryArgs { timeout: None, limit: Some(0) })
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(adapter.ack_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_rejects_empty_topic() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(Vec::new()),
            ack_calls: AtomicU32::new(0),
        });
        let engine = connected_engine(adapter, 10).await;

        let result = engine.query("", QueryArgs::default()).await;

        assert!(matches!(result, Err(PubSubError::EmptyTopic)));
    }

    #[tokio::test]
    async fn query_stops_when_the_backend_returns_no_further_records() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(vec![vec![rec(b"a")], vec![]]),
            ack_calls: AtomicU32::new(0),
        });
        let engine = connected_engine(adapter, 10).await;

        let result = engine.query("t", QueryArgs::default()).await.unwrap();

        assert_eq!(result, b"a");
    }

    #[tokio::test]
    async fn query_fails_fast_when_not_connected() {
        let adapter = Arc::new(FixedAdapter {
            batches: Mutex::new(vec![vec![rec(b"a")]]),
            ack_calls: AtomicU32::new(0),
        });
        let supervisor = Arc::new(ConnectionSupervisor::new(
            adapter.clone(),
            Arc::new(NoopMetrics),
            Duration::from_secs(30),
        ));
        let engine = QueryEngine::new(adapter, supervisor, Duration::from_secs(1), 10);

        let result = engine.query("t", QueryArgs::default()).await;

        assert!(matches!(result, Err(PubSubError::NotConnected)));
    }
}
