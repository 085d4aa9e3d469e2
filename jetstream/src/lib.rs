//! JetStream-style durable consumer-group backend adapter.
//!
//! Implements [`pubsub_core::BackendAdapter`] on top of `async-nats`'s
//! JetStream API: a pull consumer per topic, explicit-ack delivery, and
//! idempotent stream/consumer administration.
//!
//! # Delivery semantics
//!
//! At-least-once. A fetched batch is handed back to the core before any
//! ack is sent; the core (or the application, for `Subscribe`) decides when
//! to ack. An unacked message is redelivered by the broker once `ack-wait`
//! elapses — there is no local offset tracking to get out of sync.
//!
//! # Example
//!
//! ```no_run
//! use pubsub_jetstream::JetStreamAdapter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = JetStreamAdapter::builder()
//!     .server("localhost:4222")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::AdapterError;

use async_nats::jetstream::consumer::{pull::Config as PullConfig, AckPolicy, DeliverPolicy as NatsDeliverPolicy};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy as NatsRetentionPolicy, StorageType};
use async_nats::jetstream::Context;
use async_nats::{Client, ConnectOptions};
use futures::future::BoxFuture;
use futures::StreamExt;
use pubsub_core::{
    AccountInfo, AckToken, BackendAdapter, ConsumerSpec, DeliverPolicy, PubSubError, Record, RetentionPolicy,
    StorageKind, StreamDescriptor,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

type PullConsumer = async_nats::jetstream::consumer::Consumer<PullConfig>;

fn to_nats_storage(kind: StorageKind) -> StorageType {
    match kind {
        StorageKind::File => StorageType::File,
        StorageKind::Memory => StorageType::Memory,
    }
}

fn to_nats_retention(policy: RetentionPolicy) -> NatsRetentionPolicy {
    match policy {
        RetentionPolicy::Limits => NatsRetentionPolicy::Limits,
        RetentionPolicy::Interest => NatsRetentionPolicy::Interest,
        RetentionPolicy::WorkQueue => NatsRetentionPolicy::WorkQueue,
    }
}

fn to_nats_deliver_policy(policy: DeliverPolicy) -> NatsDeliverPolicy {
    match policy {
        DeliverPolicy::New => NatsDeliverPolicy::New,
        DeliverPolicy::All => NatsDeliverPolicy::All,
    }
}

/// JetStream-backed [`BackendAdapter`]. One pull consumer is created
/// lazily per topic the first time it is fetched or ack'd from.
pub struct JetStreamAdapter {
    server: String,
    credentials_file: Option<String>,
    tls: Option<pubsub_core::TlsConfig>,
    client: RwLock<Option<Client>>,
    context: RwLock<Option<Context>>,
    consumers: Mutex<HashMap<String, PullConsumer>>,
    pending_acks: Mutex<HashMap<String, async_nats::jetstream::Message>>,
}

impl JetStreamAdapter {
    /// Start building an adapter.
    #[must_use]
    pub fn builder() -> JetStreamAdapterBuilder {
        JetStreamAdapterBuilder::default()
    }

    async fn context(&self) -> Result<Context, AdapterError> {
        self.context
            .read()
            .await
            .clone()
            .ok_or(AdapterError::NotConnected)
    }

    async fn consumer_for(&self, topic: &str, group: Option<&str>) -> Result<PullConsumer, AdapterError> {
        if let Some(consumer) = self.consumers.lock().await.get(topic).cloned() {
            return Ok(consumer);
        }
        Err(AdapterError::ContextInit(format!(
            "no durable consumer registered for topic '{topic}' (group {group:?}); call create_or_update_consumer first"
        )))
    }
}

/// Fluent builder for [`JetStreamAdapter`].
#[derive(Default)]
pub struct JetStreamAdapterBuilder {
    server: Option<String>,
    credentials_file: Option<String>,
    tls: Option<pubsub_core::TlsConfig>,
}

impl JetStreamAdapterBuilder {
    /// Set the NATS server address(es).
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set a path to a NATS credentials file.
    #[must_use]
    pub fn credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Set TLS material references.
    #[must_use]
    pub fn tls(mut self, tls: pubsub_core::TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Construct the adapter. Does not connect; call
    /// [`BackendAdapter::connect`] for that.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if no server was configured.
    pub fn build(self) -> Result<JetStreamAdapter, PubSubError> {
        let server = self
            .server
            .ok_or_else(|| PubSubError::ConfigInvalid("jetstream adapter requires a server address".into()))?;
        Ok(JetStreamAdapter {
            server,
            credentials_file: self.credentials_file,
            tls: self.tls,
            client: RwLock::new(None),
            context: RwLock::new(None),
            consumers: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
        })
    }
}

impl BackendAdapter for JetStreamAdapter {
    fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            let mut options = ConnectOptions::new();
            if let Some(creds) = &self.credentials_file {
                options = options
                    .credentials_file(creds)
                    .await
                    .map_err(|e| AdapterError::Auth(e.to_string()))?;
            }
            if let Some(tls) = &self.tls {
                options = options.require_tls(true);
                if let Some(ca) = &tls.ca_cert {
                    options = options.add_root_certificates(ca.into());
                }
                if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
                    options = options.add_client_certificate(cert.into(), key.into());
                }
            }

            let client = async_nats::connect_with_options(&self.server, options)
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;
            let context = async_nats::jetstream::new(client.clone());

            *self.client.write().await = Some(client);
            *self.context.write().await = Some(context);
            tracing::info!(server = %self.server, "jetstream adapter connected");
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(client) = self.client.read().await.clone() else {
                return false;
            };
            client.connection_state() == async_nats::connection::State::Connected
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            if let Some(client) = self.client.write().await.take() {
                client
                    .drain()
                    .await
                    .map_err(|e| PubSubError::Backend(e.to_string()))?;
            }
            self.context.write().await.take();
            Ok(())
        })
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>> {
        let subject = subject.to_string();
        let payload = bytes::Bytes::copy_from_slice(payload);
        Box::pin(async move {
            let context = self.context().await?;
            let ack = context
                .publish(subject.clone(), payload)
                .await
                .map_err(|e| PubSubError::PublishFailed {
                    topic: subject.clone(),
                    reason: e.to_string(),
                })?;
            ack.await
                .map_err(|e| PubSubError::PublishFailed { topic: subject, reason: e.to_string() })?;
            Ok(())
        })
    }

    fn create_or_update_consumer(&self, spec: ConsumerSpec) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            let context = self.context().await?;
            let stream = context
                .get_stream(&spec.group)
                .await
                .map_err(|e| AdapterError::ContextInit(e.to_string()))?;

            let config = PullConfig {
                durable_name: Some(spec.instance.clone()),
                filter_subject: spec.filter.clone(),
                ack_policy: AckPolicy::Explicit,
                deliver_policy: to_nats_deliver_policy(spec.deliver_policy),
                ack_wait: spec.ack_wait,
                max_deliver: spec.max_deliver,
                ..Default::default()
            };

            let consumer = stream
                .get_or_create_consumer(&spec.instance, config)
                .await
                .map_err(|e| AdapterError::ContextInit(e.to_string()))?;

            self.consumers.lock().await.insert(spec.filter.clone(), consumer);
            Ok(())
        })
    }

    fn fetch(
        &self,
        topic: &str,
        max: u32,
        max_wait: Duration,
        _replay: bool,
    ) -> BoxFuture<'_, Result<Vec<Record>, PubSubError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let consumer = self
                .consumer_for(&topic, None)
                .await
                .map_err(PubSubError::from)?;

            let mut batch = consumer
                .fetch()
                .max_messages(max as usize)
                .expires(max_wait)
                .messages()
                .await
                .map_err(|e| PubSubError::FetchFailed { topic: topic.clone(), reason: e.to_string() })?;

            let mut records = Vec::new();
            while let Some(message) = batch.next().await {
                let message = message.map_err(|e| PubSubError::FetchFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
                let info = message.info().map_err(|e| PubSubError::FetchFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
                let backend_id = format!("{}:{}", info.stream_sequence, info.consumer_sequence);
                let mut headers = HashMap::new();
                if let Some(nats_headers) = &message.headers {
                    for (name, values) in nats_headers.iter() {
                        headers.insert(name.to_string(), values.iter().map(ToString::to_string).collect());
                    }
                }
                let payload = message.payload.to_vec();
                self.pending_acks.lock().await.insert(backend_id.clone(), message);
                records.push(Record {
                    payload,
                    headers,
                    ack_token: AckToken { backend: backend_id },
                });
            }
            Ok(records)
        })
    }

    fn ack(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        let key = token.backend.clone();
        Box::pin(async move {
            if let Some(message) = self.pending_acks.lock().await.remove(&key) {
                message
                    .ack()
                    .await
                    .map_err(|e| AdapterError::Ack(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn nak(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        let key = token.backend.clone();
        Box::pin(async move {
            if let Some(message) = self.pending_acks.lock().await.remove(&key) {
                message
                    .ack_with(async_nats::jetstream::AckKind::Nak(None))
                    .await
                    .map_err(|e| AdapterError::Ack(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn create_stream(&self, descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
        let descriptor = descriptor.clone();
        Box::pin(async move {
            let context = self.context().await?;
            context
                .get_or_create_stream(StreamConfig {
                    name: descriptor.name.clone(),
                    subjects: descriptor.subjects.clone(),
                    max_age: descriptor.max_age,
                    max_bytes: descriptor.max_bytes,
                    storage: to_nats_storage(descriptor.storage),
                    retention: to_nats_retention(descriptor.retention),
                    ..Default::default()
                })
                .await
                .map_err(|e| AdapterError::Admin(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_stream(&self, name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        let name = name.to_string();
        Box::pin(async move {
            let context = self.context().await?;
            context
                .delete_stream(&name)
                .await
                .map_err(|e| AdapterError::Admin(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_consumer(&self, _group: &str, instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        let instance = instance.to_string();
        Box::pin(async move {
            self.consumers.lock().await.retain(|_, c| c.cached_info().name != instance);
            Ok(())
        })
    }

    fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
        Box::pin(async move {
            let context = self.context().await?;
            let info = context
                .query_account()
                .await
                .map_err(|e| AdapterError::Admin(e.to_string()))?;
            Ok(AccountInfo {
                detail: format!("{info:?}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_a_server() {
        let result = JetStreamAdapter::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_with_server_succeeds() {
        let adapter = JetStreamAdapter::builder().server("localhost:4222").build();
        assert!(adapter.is_ok());
    }

    #[test]
    fn jetstream_adapter_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<JetStreamAdapter>();
        assert_sync::<JetStreamAdapter>();
    }
}
