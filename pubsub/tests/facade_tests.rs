//! Facade-level tests against `pubsub-testing::InMemoryAdapter`, exercising
//! `PubSub` the way a host application would rather than poking at
//! `pubsub-core` components directly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pubsub_core::{
    BackendAdapter, BackendMode, EngineConfig, QueryArgs, RetentionPolicy, StorageKind, StreamDescriptor, TlsConfig,
};
use pubsub_testing::InMemoryAdapter;
use pubsub::PubSub;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_engine(backend_mode: BackendMode, consumer_group: Option<String>) -> EngineConfig {
    EngineConfig {
        server: "test".to_string(),
        credentials: None,
        tls: None::<TlsConfig>,
        backend_mode,
        stream: StreamDescriptor {
            name: "orders".to_string(),
            subjects: vec!["orders".to_string()],
            max_deliver: -1,
            max_age: Duration::from_secs(0),
            max_bytes: 0,
            storage: StorageKind::Memory,
            retention: RetentionPolicy::Limits,
        },
        consumer_group,
        consumer_instance: Some("test-instance".to_string()),
        batch_size: 10,
        max_wait: Duration::from_millis(100),
        ack_wait: Duration::from_secs(5),
        buffer_size: 16,
        query_timeout: Duration::from_millis(200),
        query_limit: 10,
        retry_interval: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn publish_then_subscribe_delivers_the_message() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisStream, Some("billing".to_string()));
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    pubsub.publish("orders", b"order-1").await.expect("publish should succeed");

    let message = pubsub
        .subscribe("orders", CancellationToken::new())
        .await
        .expect("subscribe should succeed")
        .expect("a message should be delivered");
    assert_eq!(message.payload, b"order-1");

    message.commit().await;
    pubsub.close().await.expect("close should be graceful");
}

#[tokio::test]
async fn subscribe_without_consumer_group_in_durable_mode_fails_fast() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisStream, None);
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let result = pubsub.subscribe("orders", CancellationToken::new()).await;

    assert!(matches!(result, Err(pubsub_core::error::PubSubError::ConsumerGroupMissing)));
}

#[tokio::test]
async fn subscribe_returns_none_on_cancellation() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisChannel, None);
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pubsub
        .subscribe("orders", cancel)
        .await
        .expect("cancellation is not an error");

    assert!(result.is_none());
}

#[tokio::test]
async fn query_concatenates_payloads_with_newline_and_acks_each_record() {
    let inner = Arc::new(InMemoryAdapter::new());
    inner.connect().await.expect("connect should succeed");
    inner.seed("orders", b"first");
    inner.seed("orders", b"second");
    let adapter: Arc<dyn BackendAdapter> = inner.clone();

    let engine = test_engine(BackendMode::RedisStream, Some("billing".to_string()));
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let result = pubsub
        .query("orders", QueryArgs { timeout: Some(Duration::from_millis(200)), limit: Some(10) })
        .await
        .expect("query should succeed");

    assert_eq!(result, b"first\nsecond");
    assert_eq!(inner.queue_len("orders"), 0);
}

#[tokio::test]
async fn query_with_zero_limit_returns_empty_without_contacting_backend() {
    let inner = Arc::new(InMemoryAdapter::new());
    inner.connect().await.expect("connect should succeed");
    inner.seed("orders", b"untouched");
    let adapter: Arc<dyn BackendAdapter> = inner.clone();

    let engine = test_engine(BackendMode::RedisStream, Some("billing".to_string()));
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let result = pubsub
        .query("orders", QueryArgs { timeout: None, limit: Some(0) })
        .await
        .expect("query should succeed");

    assert!(result.is_empty());
    assert_eq!(inner.queue_len("orders"), 1);
}

#[tokio::test]
async fn create_topic_for_the_reserved_migrations_stream_uses_its_fixed_descriptor() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisStream, Some("billing".to_string()));
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    pubsub
        .create_topic(pubsub_core::admin::RESERVED_MIGRATIONS_STREAM)
        .await
        .expect("create_topic should succeed");
}

#[tokio::test]
async fn health_reports_up_once_connected() {
    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisChannel, None);
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let report = pubsub.health().await;

    assert_eq!(report.status, pubsub_core::Status::Up);
}

#[tokio::test]
async fn use_metrics_rebinds_the_sink_observed_by_later_calls() {
    use pubsub_core::capability::Metrics;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingMetrics(AtomicU32);
    impl Metrics for CountingMetrics {
        fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let adapter: Arc<dyn BackendAdapter> = Arc::new(InMemoryAdapter::new());
    let engine = test_engine(BackendMode::RedisChannel, None);
    let pubsub = PubSub::connect_with_adapter(engine, adapter).await.expect("connect should succeed");

    let counting = Arc::new(CountingMetrics(AtomicU32::new(0)));
    pubsub.use_metrics(counting.clone());

    pubsub.publish("orders", b"hi").await.expect("publish should succeed");

    assert!(counting.0.load(Ordering::SeqCst) >= 2); // total + success
}
