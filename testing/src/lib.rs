//! In-memory [`pubsub_core::BackendAdapter`] for exercising the engine
//! without a live broker.
//!
//! Grounded on the hand-rolled mock adapters scattered through
//! `pubsub-core`'s own unit tests, generalized into one reusable,
//! publicly exported adapter: messages published to a topic queue up
//! in-process, `fetch` drains them, and `nak` requeues at the front of the
//! same topic's queue so a rolled-back message is the next one delivered
//! (spec §10.4).

use futures::future::BoxFuture;
use pubsub_core::{AccountInfo, AckToken, BackendAdapter, ConsumerSpec, PubSubError, Record, StreamDescriptor};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Headers = HashMap<String, Vec<String>>;

struct Pending {
    topic: String,
    payload: Vec<u8>,
    headers: Headers,
}

/// A backend adapter backed entirely by in-process queues. Connect/close
/// flip a liveness flag; every other operation is immediate.
pub struct InMemoryAdapter {
    topics: Mutex<HashMap<String, VecDeque<(Vec<u8>, Headers)>>>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAdapter {
    /// Build an empty adapter. Starts disconnected; call through
    /// [`BackendAdapter::connect`] before use, matching every real adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    /// Directly enqueue a payload on `topic`, bypassing `publish`. Useful
    /// for seeding fixtures before a test starts its subscription.
    pub fn seed(&self, topic: &str, payload: &[u8]) {
        self.topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push_back((payload.to_vec(), HashMap::new()));
    }

    /// Number of messages currently queued for `topic`, not yet fetched.
    #[must_use]
    pub fn queue_len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(topic)
            .map_or(0, VecDeque::len)
    }
}

fn lock_poisoned_ok<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl BackendAdapter for InMemoryAdapter {
    fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        self.connected.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        let connected = self.connected.load(Ordering::SeqCst);
        Box::pin(async move { connected })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        self.connected.store(false, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Box::pin(async { Err(PubSubError::NotConnected) });
        }
        self.seed(subject, payload);
        Box::pin(async { Ok(()) })
    }

    fn create_or_update_consumer(&self, _spec: ConsumerSpec) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
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
            let deadline = tokio::time::Instant::now() + max_wait;
            loop {
                let drained: Vec<(Vec<u8>, Headers)> = {
                    let mut topics = lock_poisoned_ok(&self.topics);
                    let queue = topics.entry(topic.clone()).or_default();
                    let n = (max as usize).min(queue.len());
                    queue.drain(..n).collect()
                };

                if !drained.is_empty() {
                    let mut pending = lock_poisoned_ok(&self.pending);
                    let records = drained
                        .into_iter()
                        .map(|(payload, headers)| {
                            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                            pending.insert(
                                id,
                                Pending {
                                    topic: topic.clone(),
                                    payload: payload.clone(),
                                    headers: headers.clone(),
                                },
                            );
                            Record {
                                payload,
                                headers,
                                ack_token: AckToken { backend: id.to_string() },
                            }
                        })
                        .collect();
                    return Ok(records);
                }

                if tokio::time::Instant::now() >= deadline {
                    return Ok(Vec::new());
                }
                tokio::time::sleep(Duration::from_millis(5).min(max_wait)).await;
            }
        })
    }

    fn ack(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        if let Ok(id) = token.backend.parse::<u64>() {
            lock_poisoned_ok(&self.pending).remove(&id);
        }
        Box::pin(async { Ok(()) })
    }

    fn nak(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        if let Ok(id) = token.backend.parse::<u64>() {
            if let Some(entry) = lock_poisoned_ok(&self.pending).remove(&id) {
                lock_poisoned_ok(&self.topics)
                    .entry(entry.topic)
                    .or_default()
                    .push_front((entry.payload, entry.headers));
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn create_stream(&self, _descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn delete_stream(&self, name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        lock_poisoned_ok(&self.topics).remove(name);
        Box::pin(async { Ok(()) })
    }

    fn delete_consumer(&self, _group: &str, _instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
        Box::pin(async { Ok(AccountInfo { detail: "in-memory".to_string() }) })
    }
}
