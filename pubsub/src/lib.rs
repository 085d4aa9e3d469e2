//! Client-side pub/sub engine facade (spec §4.7).
//!
//! [`PubSub`] is the single entry point a host application constructs: it
//! resolves a [`FacadeConfig`] into a concrete adapter, wires the
//! backend-agnostic `pubsub-core` components around it, and exposes the
//! narrow `Publish`/`Subscribe`/`Query`/`Admin`/`Health` surface spec §6
//! names. Everything backend-specific stops at [`build_adapter`].

pub mod capability;
pub mod config;

use capability::{SharedLogger, SharedMetrics, SharedTracer};
use config::FacadeConfig;
use futures::future::BoxFuture;
use pubsub_core::{
    admin, BackendAdapter, BackendMode, ConnectionSupervisor, EngineConfig, HealthReport, HealthReporter, Logger,
    Message, Metrics, PubSubError, QueryArgs, QueryEngine, StreamDescriptor, SubscriptionManager,
    SubscriptionManagerConfig, Tracer,
};
use pubsub_jetstream::JetStreamAdapter;
use pubsub_redis::{RedisChannelAdapter, RedisStreamAdapter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Bound on the account-info probe [`HealthReporter::check`] performs
/// (spec §4.7).
const PING_TIMEOUT: Duration = Duration::from_secs(5);

fn build_adapter(config: &FacadeConfig) -> Result<Arc<dyn BackendAdapter>, PubSubError> {
    match config.engine.backend_mode {
        BackendMode::JetStream => {
            let jetstream = config
                .jetstream
                .as_ref()
                .ok_or_else(|| PubSubError::ConfigInvalid("jetstream connection block missing".into()))?;
            let mut builder = JetStreamAdapter::builder().server(jetstream.server.clone());
            if let Some(creds) = &jetstream.creds_file {
                builder = builder.credentials_file(creds.clone());
            }
            if let Some(tls) = &config.engine.tls {
                builder = builder.tls(tls.clone());
            }
            Ok(Arc::new(builder.build()?))
        }
        BackendMode::RedisChannel => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| PubSubError::ConfigInvalid("redis connection block missing".into()))?;
            let mut builder = RedisChannelAdapter::builder()
                .host(redis.host.clone())
                .port(redis.port)
                .db(redis.pubsub_db)
                .tls(redis.tls_enabled);
            if let Some(username) = &redis.username {
                builder = builder.username(username.clone());
            }
            if let Some(password) = &redis.password {
                builder = builder.password(password.clone());
            }
            Ok(Arc::new(builder.build()?))
        }
        BackendMode::RedisStream => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| PubSubError::ConfigInvalid("redis connection block missing".into()))?;
            let mut builder = RedisStreamAdapter::builder()
                .host(redis.host.clone())
                .port(redis.port)
                .db(redis.db)
                .tls(redis.tls_enabled);
            if let Some(username) = &redis.username {
                builder = builder.username(username.clone());
            }
            if let Some(password) = &redis.password {
                builder = builder.password(password.clone());
            }
            if let Some(maxlen) = redis.maxlen {
                builder = builder.maxlen(maxlen);
            }
            Ok(Arc::new(builder.build()?))
        }
    }
}

fn stream_descriptor_for(name: &str, engine: &EngineConfig) -> StreamDescriptor {
    if name == admin::RESERVED_MIGRATIONS_STREAM {
        return admin::reserved_migrations_descriptor();
    }
    StreamDescriptor {
        name: name.to_string(),
        subjects: vec![name.to_string()],
        ..engine.stream.clone()
    }
}

/// The facade applications construct: routes calls to whichever backend
/// [`FacadeConfig`] resolved to, late-binding an optional [`Logger`],
/// [`Metrics`] sink, and [`Tracer`] (spec §4.7, §10.1/§10.5/§10.6).
pub struct PubSub {
    supervisor: Arc<ConnectionSupervisor>,
    subscriptions: Arc<SubscriptionManager>,
    query_engine: Arc<QueryEngine>,
    admin: Arc<pubsub_core::Administrator>,
    health_reporter: Arc<HealthReporter>,
    logger: Arc<SharedLogger>,
    metrics: Arc<SharedMetrics>,
    tracer: Arc<SharedTracer>,
    engine: EngineConfig,
}

impl PubSub {
    /// Resolve `config`, construct the matching backend adapter, and bring
    /// up the connection supervisor and subscription manager around it.
    ///
    /// # Errors
    ///
    /// Returns the adapter builder's or [`ConnectionSupervisor::connect`]'s
    /// error verbatim.
    #[tracing::instrument(skip(config), fields(backend = ?config.engine.backend_mode))]
    pub async fn connect(config: FacadeConfig) -> Result<Self, PubSubError> {
        let adapter = build_adapter(&config)?;
        Self::connect_with_adapter(config.engine, adapter).await
    }

    /// Wire the engine around an already-constructed adapter, bypassing
    /// [`build_adapter`]. Exposed for testing against
    /// `pubsub-testing::InMemoryAdapter`; production callers should use
    /// [`PubSub::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionSupervisor::connect`]'s error verbatim.
    pub async fn connect_with_adapter(
        engine: EngineConfig,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Result<Self, PubSubError> {
        let metrics = Arc::new(SharedMetrics::default());
        let logger = Arc::new(SharedLogger::default());
        let tracer = Arc::new(SharedTracer::default());

        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            engine.retry_interval,
        ));
        supervisor.connect().await?;

        let consumer_instance = engine
            .consumer_instance
            .clone()
            .unwrap_or_else(|| pubsub_core::registry::default_instance_name(Instant::now()));

        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            SubscriptionManagerConfig {
                backend_mode: engine.backend_mode,
                consumer_group: engine.consumer_group.clone(),
                consumer_instance,
                batch_size: engine.batch_size,
                max_wait: engine.max_wait,
                ack_wait: engine.ack_wait,
                buffer_size: engine.buffer_size,
                retry_interval: engine.retry_interval,
            },
        ));

        let hook_subscriptions = Arc::clone(&subscriptions);
        supervisor.spawn_monitor(Arc::new(move || {
            let subscriptions = Arc::clone(&hook_subscriptions);
            Box::pin(async move {
                subscriptions.resubscribe_all().await;
            })
        }));

        let query_engine = Arc::new(QueryEngine::new(
            Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
            Arc::clone(&supervisor),
            engine.query_timeout,
            engine.query_limit,
        ));
        let admin = Arc::new(pubsub_core::Administrator::new(
            Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
            engine.backend_mode,
        ));
        let health_reporter = Arc::new(HealthReporter::new(
            Arc::clone(&supervisor),
            Arc::clone(&adapter) as Arc<dyn BackendAdapter>,
            engine.server.clone(),
            engine.backend_mode,
            PING_TIMEOUT,
        ));

        Ok(Self {
            supervisor,
            subscriptions,
            query_engine,
            admin,
            health_reporter,
            logger,
            metrics,
            tracer,
            engine,
        })
    }

    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::NotConnected`] or the adapter's publish error.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubSubError> {
        let span = self.tracer.start_span("pubsub.publish");
        let result = self.supervisor.publish(topic, payload).await;
        self.tracer.end_span(span);
        if let Err(err) = &result {
            self.logger.log(pubsub_core::LogLevel::Error, &format!("publish failed: {err}"));
        }
        result
    }

    /// Block until one message arrives on `topic` or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConsumerGroupMissing`] in a durable mode with
    /// no configured consumer group.
    pub async fn subscribe(&self, topic: &str, cancel: CancellationToken) -> Result<Option<Message>, PubSubError> {
        self.subscriptions.subscribe(topic, cancel).await
    }

    /// Drive `handler` over every message on `subject` until `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConsumerGroupMissing`] in a durable mode with
    /// no configured consumer group.
    pub async fn subscribe_with_handler<F>(
        &self,
        subject: &str,
        handler: F,
        cancel: CancellationToken,
    ) -> Result<(), PubSubError>
    where
        F: Fn(Message) -> BoxFuture<'static, Result<(), PubSubError>> + Send + Sync + 'static,
    {
        self.subscriptions
            .subscribe_with_handler(subject, handler, cancel)
            .await
    }

    /// Drop one topic's tracked subscription, tearing down its fetch loop.
    pub async fn unsubscribe(&self, topic: &str) {
        self.subscriptions.unsubscribe(topic).await;
    }

    /// Bounded bulk read over `topic`'s recent history.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::EmptyTopic`], [`PubSubError::NotConnected`],
    /// or the adapter's fetch error.
    pub async fn query(&self, topic: &str, args: QueryArgs) -> Result<Vec<u8>, PubSubError> {
        self.query_engine.query(topic, args).await
    }

    /// Idempotently create a topic/stream by name, deriving its descriptor
    /// from the engine's defaults (or the reserved migrations descriptor,
    /// for [`admin::RESERVED_MIGRATIONS_STREAM`]).
    ///
    /// # Errors
    ///
    /// Returns the adapter's create error verbatim, unless it is
    /// recognized as "already exists".
    pub async fn create_topic(&self, name: &str) -> Result<(), PubSubError> {
        let descriptor = stream_descriptor_for(name, &self.engine);
        self.admin.create_topic(&descriptor).await
    }

    /// Idempotently delete a topic/stream by name. No-op in channel mode.
    ///
    /// # Errors
    ///
    /// Returns the adapter's delete error verbatim, unless it is
    /// recognized as "not found".
    pub async fn delete_topic(&self, name: &str) -> Result<(), PubSubError> {
        self.admin.delete_topic(name).await
    }

    /// Idempotently create a stream from an explicit descriptor.
    ///
    /// # Errors
    ///
    /// Returns the adapter's create error verbatim, unless it is
    /// recognized as "already exists".
    pub async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), PubSubError> {
        self.admin.create_stream(descriptor).await
    }

    /// Idempotently delete a stream by name.
    ///
    /// # Errors
    ///
    /// Returns the adapter's delete error verbatim, unless it is
    /// recognized as "not found".
    pub async fn delete_stream(&self, name: &str) -> Result<(), PubSubError> {
        self.admin.delete_stream(name).await
    }

    /// Create a stream if absent, or leave an existing one untouched.
    ///
    /// # Errors
    ///
    /// Returns the adapter's create error verbatim, unless it is
    /// recognized as "already exists".
    pub async fn create_or_update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), PubSubError> {
        self.admin.create_or_update_stream(descriptor).await
    }

    /// Best-effort delete of a single consumer instance. Never fails.
    pub async fn delete_consumer(&self, group: &str, instance: &str) {
        self.admin.delete_consumer(group, instance).await;
    }

    /// Current up/down health snapshot.
    pub async fn health(&self) -> HealthReport {
        self.health_reporter.check().await
    }

    /// Close every tracked subscription, then the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns the adapter's close error verbatim.
    pub async fn close(&self) -> Result<(), PubSubError> {
        self.subscriptions.close().await;
        self.supervisor.close().await
    }

    /// Rebind the metrics sink used by the connection supervisor and
    /// subscription manager.
    pub fn use_metrics(&self, metrics: Arc<dyn Metrics>) {
        self.metrics.set(metrics);
    }

    /// Rebind the logger the facade's own methods call alongside their
    /// `tracing` instrumentation.
    pub fn use_logger(&self, logger: Arc<dyn Logger>) {
        self.logger.set(logger);
    }

    /// Rebind the tracer the facade's own methods call alongside their
    /// `tracing::instrument` spans.
    pub fn use_tracer(&self, tracer: Arc<dyn Tracer>) {
        self.tracer.set(tracer);
    }
}
