//! Integration tests against a real Redis server, covering both adapter
//! modes.
//!
//! Skipped unless `PUBSUB_REDIS_TEST_URL` is set, e.g.:
//!
//! ```text
//! docker run -p 6379:6379 redis:latest
//! PUBSUB_REDIS_TEST_URL=localhost cargo test -p pubsub-redis --test integration_tests
//! ```
//!
//! # Panics
//!
//! These tests use `expect()` for setup failures, which is acceptable in
//! test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use pubsub_core::{BackendAdapter, ConsumerSpec, DeliverPolicy};
use pubsub_redis::{RedisChannelAdapter, RedisStreamAdapter};
use std::time::Duration;

macro_rules! require_redis_host {
    () => {
        match std::env::var("PUBSUB_REDIS_TEST_URL") {
            Ok(host) => host,
            Err(_) => {
                eprintln!("skipping: PUBSUB_REDIS_TEST_URL not set");
                return;
            }
        }
    };
}

fn unique_key(prefix: &str) -> String {
    format!("{prefix}-{}", std::process::id())
}

#[tokio::test]
async fn channel_publish_before_subscribe_is_lost_then_live_publish_is_received() {
    let host = require_redis_host!();
    let adapter = RedisChannelAdapter::builder()
        .host(host)
        .db(15)
        .build()
        .expect("builder should succeed");
    adapter.connect().await.expect("connect should succeed");

    let topic = unique_key("pubsub-it-channel");

    // Lost: nobody has subscribed yet.
    adapter
        .publish(&topic, b"missed")
        .await
        .expect("publish should succeed even with no subscriber");

    // The first fetch() lazily subscribes; the short timeout here just
    // establishes the subscription, the message above is already gone.
    let empty = adapter
        .fetch(&topic, 1, Duration::from_millis(200), false)
        .await
        .expect("fetch should succeed");
    assert!(empty.is_empty());

    adapter.publish(&topic, b"live").await.expect("publish should succeed");

    let received = adapter
        .fetch(&topic, 1, Duration::from_secs(2), false)
        .await
        .expect("fetch should succeed");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, b"live");

    adapter.close().await.expect("close should be graceful");
}

#[tokio::test]
async fn stream_publish_subscribe_ack_round_trip() {
    let host = require_redis_host!();
    let adapter = RedisStreamAdapter::builder()
        .host(host)
        .db(15)
        .maxlen(1000)
        .build()
        .expect("builder should succeed");
    adapter.connect().await.expect("connect should succeed");

    let topic = unique_key("pubsub-it-stream");

    adapter
        .create_or_update_consumer(ConsumerSpec {
            group: "it-group".to_string(),
            instance: "it-consumer".to_string(),
            filter: topic.clone(),
            deliver_policy: DeliverPolicy::New,
            ack_wait: Duration::from_secs(5),
            max_deliver: 3,
        })
        .await
        .expect("create_or_update_consumer should succeed");

    adapter.publish(&topic, b"hello").await.expect("publish should succeed");

    let batch = adapter
        .fetch(&topic, 10, Duration::from_secs(2), false)
        .await
        .expect("fetch should succeed");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload, b"hello");

    adapter.ack(&batch[0].ack_token).await.expect("ack should succeed");
    adapter.delete_stream(&topic).await.expect("delete_stream should succeed");
    adapter.close().await.expect("close should be graceful");
}

#[tokio::test]
async fn stream_nak_leaves_message_in_pel_for_replay() {
    let host = require_redis_host!();
    let adapter = RedisStreamAdapter::builder().host(host).db(15).build().expect("builder should succeed");
    adapter.connect().await.expect("connect should succeed");

    let topic = unique_key("pubsub-it-pel");

    adapter
        .create_or_update_consumer(ConsumerSpec {
            group: "it-group".to_string(),
            instance: "it-consumer".to_string(),
            filter: topic.clone(),
            deliver_policy: DeliverPolicy::New,
            ack_wait: Duration::from_secs(5),
            max_deliver: 3,
        })
        .await
        .expect("create_or_update_consumer should succeed");

    adapter.publish(&topic, b"retry-me").await.expect("publish should succeed");

    let first = adapter
        .fetch(&topic, 1, Duration::from_secs(2), false)
        .await
        .expect("fetch should succeed");
    assert_eq!(first.len(), 1);
    adapter.nak(&first[0].ack_token).await.expect("nak should succeed");

    let replayed = adapter
        .fetch(&topic, 1, Duration::ZERO, true)
        .await
        .expect("replay fetch should succeed");
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].payload, b"retry-me");

    adapter.ack(&replayed[0].ack_token).await.expect("ack should succeed");
    adapter.delete_stream(&topic).await.expect("cleanup should succeed");
    adapter.close().await.expect("close should be graceful");
}
