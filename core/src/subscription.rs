//! Subscription manager: the per-topic subscription state machine
//! (spec §4.2 — the heart of the core).

use crate::adapter::{BackendAdapter, ConsumerSpec, DeliverPolicy};
use crate::capability::Metrics;
use crate::config::BackendMode;
use crate::error::PubSubError;
use crate::message::{Committer, Message};
use crate::registry::{consumer_name, StreamConsumerRecord};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long [`SubscriptionManager::close`]/[`SubscriptionManager::unsubscribe`]
/// wait for a fetch loop to exit before giving up (spec §5).
const GOROUTINE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Quiet sleep after a fetch that returned no records within `max_wait`
/// (spec §4.2 "fetch-deadline-exceeded").
const FETCH_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// A closed vocabulary of backend error substrings recognized as permanent:
/// the fetch loop for that topic terminates rather than retrying forever
/// (spec §4.2, §7).
const PERMANENT_ERROR_SUBSTRINGS: [&str; 4] =
    ["invalid subject", "permission denied", "wrong type", "invalid group"];

fn is_permanent(err: &PubSubError) -> bool {
    if matches!(err, PubSubError::PermanentSubscription { .. }) {
        return true;
    }
    let text = err.to_string().to_lowercase();
    PERMANENT_ERROR_SUBSTRINGS.iter().any(|s| text.contains(s))
}

/// Per-topic subscription state (spec §3 `Subscription`).
struct Subscription {
    tx: mpsc::Sender<Message>,
    rx: RwLock<Option<mpsc::Receiver<Message>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    pending_replay: AtomicBool,
    task: RwLock<Option<JoinHandle<()>>>,
}

/// Owns the per-topic subscription state machine: consumer creation, fetch
/// loop, dispatch into a bounded buffer, and orderly teardown.
pub struct SubscriptionManager {
    adapter: Arc<dyn BackendAdapter>,
    metrics: Arc<dyn Metrics>,
    backend_mode: BackendMode,
    consumer_group: Option<String>,
    consumer_instance: String,
    batch_size: u32,
    max_wait: Duration,
    ack_wait: Duration,
    buffer_size: usize,
    retry_interval: Duration,
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    /// Non-durable (redis-channel) handler subscriptions, keyed by subject,
    /// so a new `SubscribeWithHandler` call can cancel a prior one for the
    /// same subject (spec §4.2, §9).
    handlers: RwLock<HashMap<String, CancellationToken>>,
    /// Durable consumer descriptor per topic, populated in stream modes
    /// once `create_or_update_consumer` succeeds, so callers (health,
    /// admin) can introspect which consumer is currently bound to a topic.
    stream_consumers: RwLock<HashMap<String, StreamConsumerRecord>>,
}

/// Parameters shared by every `SubscriptionManager` constructor call,
/// collected to keep the constructor signature from sprawling.
pub struct SubscriptionManagerConfig {
    /// Backend mode; governs PEL-replay and drop policy.
    pub backend_mode: BackendMode,
    /// Consumer-group base name, required in durable modes.
    pub consumer_group: Option<String>,
    /// Consumer-instance name (already resolved; see `registry::default_instance_name`).
    pub consumer_instance: String,
    /// Maximum records requested per fetch.
    pub batch_size: u32,
    /// Maximum time a fetch waits for the first record.
    pub max_wait: Duration,
    /// Ack-wait passed through to durable consumer creation.
    pub ack_wait: Duration,
    /// Per-topic buffer capacity.
    pub buffer_size: usize,
    /// Backoff between fetch-error retries.
    pub retry_interval: Duration,
}

impl SubscriptionManager {
    /// Build a manager around an adapter and shared configuration.
    #[must_use]
    pub fn new(adapter: Arc<dyn BackendAdapter>, metrics: Arc<dyn Metrics>, cfg: SubscriptionManagerConfig) -> Self {
        Self {
            adapter,
            metrics,
            backend_mode: cfg.backend_mode,
            consumer_group: cfg.consumer_group,
            consumer_instance: cfg.consumer_instance,
            batch_size: cfg.batch_size,
            max_wait: cfg.max_wait,
            ack_wait: cfg.ack_wait,
            buffer_size: cfg.buffer_size,
            retry_interval: cfg.retry_interval,
            subscriptions: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            stream_consumers: RwLock::new(HashMap::new()),
        }
    }

    /// The durable consumer currently bound to `topic`, if any. Only
    /// populated in durable (jetstream/redis-stream) modes, once
    /// `subscribe`/`subscribe_with_handler` has created the consumer.
    pub async fn stream_consumer(&self, topic: &str) -> Option<StreamConsumerRecord> {
        self.stream_consumers.read().await.get(topic).cloned()
    }

    /// Subscribe to `topic`, blocking until a message arrives or `cancel`
    /// fires. On cancellation, returns `Ok(None)` — "consumer gave up", not
    /// a system fault (spec §4.2).
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConsumerGroupMissing`] if a durable mode is
    /// configured without a consumer group.
    pub async fn subscribe(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<Option<Message>, PubSubError> {
        self.metrics
            .increment("app_pubsub_subscribe_total_count", &[("topic", topic)]);

        let sub = self.get_or_start(topic).await?;

        let mut rx_guard = sub.rx.write().await;
        let Some(rx) = rx_guard.as_mut() else {
            // Buffer already torn down by a concurrent unsubscribe.
            return Ok(None);
        };

        tokio::select! {
            () = cancel.cancelled() => Ok(None),
            received = rx.recv() => {
                if let Some(group) = &self.consumer_group {
                    self.metrics.increment(
                        "app_pubsub_subscribe_success_count",
                        &[("topic", topic), ("consumer_group", group)],
                    );
                } else {
                    self.metrics
                        .increment("app_pubsub_subscribe_success_count", &[("topic", topic)]);
                }
                Ok(received)
            }
        }
    }

    /// Drive `handler` over every message delivered on `subject` until
    /// `cancel` fires. A non-error return commits; an error return rolls
    /// back and consumption continues. Any existing handler subscription
    /// for the same subject is cancelled and awaited before the new one
    /// starts (spec §4.2, serialized per design note §9 to avoid racing
    /// in-flight acknowledgements against the handler's own subscription).
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConsumerGroupMissing`] if a durable mode is
    /// configured without a consumer group.
    pub async fn subscribe_with_handler<F>(
        self: &Arc<Self>,
        subject: &str,
        handler: F,
        cancel: CancellationToken,
    ) -> Result<(), PubSubError>
    where
        F: Fn(Message) -> BoxFuture<'static, Result<(), PubSubError>> + Send + Sync + 'static,
    {
        {
            let mut handlers = self.handlers.write().await;
            if let Some(prior) = handlers.remove(subject) {
                prior.cancel();
            }
            handlers.insert(subject.to_string(), cancel.clone());
        }

        let sub = self.get_or_start(subject).await?;
        let this = Arc::clone(self);
        let subject = subject.to_string();

        loop {
            let mut rx_guard = sub.rx.write().await;
            let Some(rx) = rx_guard.as_mut() else {
                return Ok(());
            };
            let message = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                received = rx.recv() => received,
            };
            drop(rx_guard);

            let Some(message) = message else {
                return Ok(());
            };

            match handler(message).await {
                Ok(()) => {}
                Err(err) => {
                    tracing::warn!(subject = %subject, error = %err, "handler returned error; nak'd");
                }
            }
            this.metrics
                .increment("app_pubsub_subscribe_success_count", &[("topic", subject.as_str())]);
        }
    }

    /// Cancel `topic`'s fetch loop, wait up to [`GOROUTINE_WAIT_TIMEOUT`]
    /// for it to exit, close its buffer via the one-shot guard, then remove
    /// its registry entry. After this returns, the buffer is guaranteed not
    /// to be read from again (spec §5).
    pub async fn unsubscribe(&self, topic: &str) {
        let sub = { self.subscriptions.write().await.remove(topic) };
        self.stream_consumers.write().await.remove(topic);
        let Some(sub) = sub else { return };
        self.teardown(&sub).await;
    }

    /// Cancel every subscription, wait for their fetch loops, close every
    /// buffer, and clear all maps (spec §4.2).
    pub async fn close(&self) {
        let subs: Vec<Arc<Subscription>> = {
            let mut map = self.subscriptions.write().await;
            map.drain().map(|(_, v)| v).collect()
        };
        for sub in &subs {
            self.teardown(sub).await;
        }
        self.handlers.write().await.clear();
        self.stream_consumers.write().await.clear();
    }

    /// Re-establish every currently tracked subscription's fetch loop.
    /// Invoked by the connection supervisor on a reconnect edge; existing
    /// buffers and registry entries are left in place, only the fetch task
    /// is respawned (spec §4.1 "resubscribeAll").
    pub async fn resubscribe_all(self: &Arc<Self>) {
        let topics: Vec<String> = self.subscriptions.read().await.keys().cloned().collect();
        for topic in topics {
            let sub = self.subscriptions.read().await.get(&topic).cloned();
            if let Some(sub) = sub {
                let mut task_guard = sub.task.write().await;
                if task_guard.as_ref().is_none_or(JoinHandle::is_finished) {
                    *task_guard = Some(self.spawn_fetch_loop(topic, Arc::clone(&sub)));
                }
            }
        }
    }

    async fn teardown(&self, sub: &Arc<Subscription>) {
        sub.cancel.cancel();
        let handle = sub.task.write().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(GOROUTINE_WAIT_TIMEOUT, handle).await;
        }
        if !sub.closed.swap(true, Ordering::SeqCst) {
            sub.rx.write().await.take();
        }
    }

    /// Double-checked start: look up under a read lock first, then
    /// upgrade to a write lock and re-check before creating (spec §4.2
    /// step 2).
    async fn get_or_start(&self, topic: &str) -> Result<Arc<Subscription>, PubSubError> {
        if self.backend_mode.is_durable()
            && self.consumer_group.as_ref().is_none_or(String::is_empty)
        {
            return Err(PubSubError::ConsumerGroupMissing);
        }

        if let Some(sub) = self.subscriptions.read().await.get(topic) {
            return Ok(Arc::clone(sub));
        }

        let mut map = self.subscriptions.write().await;
        if let Some(sub) = map.get(topic) {
            return Ok(Arc::clone(sub));
        }

        if let Some(group) = &self.consumer_group {
            let instance = consumer_name(&self.consumer_instance, topic);
            self.adapter
                .create_or_update_consumer(ConsumerSpec {
                    group: group.clone(),
                    instance: instance.clone(),
                    filter: topic.to_string(),
                    deliver_policy: DeliverPolicy::New,
                    ack_wait: self.ack_wait,
                    max_deliver: -1,
                })
                .await?;
            self.stream_consumers.write().await.insert(
                topic.to_string(),
                StreamConsumerRecord {
                    stream: topic.to_string(),
                    group: group.clone(),
                    instance,
                },
            );
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let sub = Arc::new(Subscription {
            tx,
            rx: RwLock::new(Some(rx)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            pending_replay: AtomicBool::new(false),
            task: RwLock::new(None),
        });
        map.insert(topic.to_string(), Arc::clone(&sub));
        drop(map);

        // Spawned under no lock, matching §5: "the fetch loop holds neither
        // lock while blocked in adapter.fetch".
        let handle = self.spawn_fetch_loop_shared(topic.to_string(), Arc::clone(&sub));
        *sub.task.write().await = Some(handle);

        Ok(sub)
    }

    fn spawn_fetch_loop(self: &Arc<Self>, topic: String, sub: Arc<Subscription>) -> JoinHandle<()> {
        self.spawn_fetch_loop_shared(topic, sub)
    }

    /// Shared by initial subscribe and by reconnect-triggered respawn;
    /// does not require `Arc<Self>` so it can run from inside
    /// `get_or_start` while a write lock on the registry is still held by
    /// the caller's own stack frame in spirit (the lock itself is already
    /// released before this is called).
    fn spawn_fetch_loop_shared(&self, topic: String, sub: Arc<Subscription>) -> JoinHandle<()> {
        let adapter = Arc::clone(&self.adapter);
        let backend_mode = self.backend_mode;
        let batch_size = self.batch_size;
        let max_wait = self.max_wait;
        let retry_interval = self.retry_interval;

        tokio::spawn(async move {
            loop {
                if sub.cancel.is_cancelled() {
                    return;
                }

                let room = sub.tx.capacity();
                if room == 0 {
                    tokio::select! {
                        () = sub.cancel.cancelled() => return,
                        () = tokio::time::sleep(FETCH_IDLE_SLEEP) => continue,
                    }
                }
                #[allow(clippy::cast_possible_truncation)]
                let n = batch_size.min(room as u32);

                if backend_mode == BackendMode::RedisStream && !sub.pending_replay.load(Ordering::SeqCst) {
                    let replay = tokio::select! {
                        () = sub.cancel.cancelled() => return,
                        result = adapter.fetch(&topic, n, Duration::ZERO, true) => result,
                    };
                    if let Ok(batch) = replay {
                        dispatch(&sub, &topic, &adapter, batch, backend_mode);
                    }
                    sub.pending_replay.store(true, Ordering::SeqCst);
                }

                let fetched = tokio::select! {
                    () = sub.cancel.cancelled() => return,
                    result = adapter.fetch(&topic, n, max_wait, false) => result,
                };

                match fetched {
                    Ok(batch) if batch.is_empty() => {
                        tokio::select! {
                            () = sub.cancel.cancelled() => return,
                            () = tokio::time::sleep(FETCH_IDLE_SLEEP) => {}
                        }
                    }
                    Ok(batch) => dispatch(&sub, &topic, &adapter, batch, backend_mode),
                    Err(err) if is_permanent(&err) => {
                        tracing::error!(topic = %topic, error = %err, "permanent subscription error; fetch loop terminating");
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "fetch error; retrying");
                        tokio::select! {
                            () = sub.cancel.cancelled() => return,
                            () = tokio::time::sleep(retry_interval) => {}
                        }
                    }
                }
            }
        })
    }
}

fn dispatch(
    sub: &Arc<Subscription>,
    topic: &str,
    adapter: &Arc<dyn BackendAdapter>,
    batch: Vec<crate::adapter::Record>,
    backend_mode: BackendMode,
) {
    for record in batch {
        let committer = Committer::new(Arc::clone(adapter), record.ack_token);
        let message = Message::new(topic.to_string(), record.payload, record.headers, committer);
        match sub.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(topic = %topic, "subscription buffer full; dropping message");
                if backend_mode == BackendMode::RedisStream {
                    sub.pending_replay.store(false, Ordering::SeqCst);
                }
                // jetstream: PEL serves it back automatically.
                // redis-channel: fire-and-forget, the drop is permanent by design.
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(topic = %topic, "buffer closed mid-dispatch; discarding");
            }
        }
    }
}
