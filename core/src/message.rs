//! Delivered messages and their acknowledgement handles (spec §3, §4.3).

use crate::adapter::{AckToken, BackendAdapter};
use crate::error::PubSubError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Maximum number of retry attempts `Commit` makes on a transient ack
/// failure, after the first attempt (spec §4.3).
const COMMIT_MAX_RETRIES: u32 = 3;
/// Base delay for the commit retry backoff: `100ms * 2^k`.
const COMMIT_BASE_DELAY: Duration = Duration::from_millis(100);

/// A message delivered from a subscription, handed to the application by
/// ownership.
///
/// Dropping a `Message` without calling [`Message::commit`] or
/// [`Message::rollback`] leaves the delivery outstanding; the broker will
/// redeliver it once `ack-wait` elapses.
#[derive(Debug)]
pub struct Message {
    /// Topic the message was delivered on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Metadata headers; unordered, possibly multi-valued.
    pub headers: HashMap<String, Vec<String>>,
    committer: Committer,
}

impl Message {
    /// Construct a message around an already-allocated [`Committer`].
    #[must_use]
    pub const fn new(
        topic: String,
        payload: Vec<u8>,
        headers: HashMap<String, Vec<String>>,
        committer: Committer,
    ) -> Self {
        Self {
            topic,
            payload,
            headers,
            committer,
        }
    }

    /// Acknowledge the message. See [`Committer::commit`].
    pub async fn commit(&self) {
        self.committer.commit().await;
    }

    /// Negatively acknowledge the message, requesting immediate
    /// redelivery. See [`Committer::rollback`].
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::AckFailed`] if the single nak attempt fails.
    pub async fn rollback(&self) -> Result<(), PubSubError> {
        self.committer.rollback().await
    }
}

/// Per-message acknowledgement handle (spec §3, §4.3).
///
/// Commit and rollback are mutually exclusive: the first call wins and
/// later calls are no-ops (or, for rollback, still only attempted once
/// total — a commit that already succeeded makes a subsequent rollback a
/// no-op rather than a real nak).
#[derive(Debug, Clone)]
pub struct Committer {
    adapter: Arc<dyn BackendAdapter>,
    token: AckToken,
    settled: Arc<AtomicBool>,
}

impl Committer {
    /// Build a committer for exactly one delivery.
    #[must_use]
    pub fn new(adapter: Arc<dyn BackendAdapter>, token: AckToken) -> Self {
        Self {
            adapter,
            token,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acknowledge the delivery this committer was built for.
    ///
    /// Retries up to [`COMMIT_MAX_RETRIES`] times with exponential backoff
    /// (100ms, 200ms, 400ms) on failure. A terminal failure after retries
    /// is logged, never returned — the broker will redeliver once
    /// `ack-wait` expires (spec §4.3, §7).
    pub async fn commit(&self) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut attempt = 0u32;
        loop {
            match self.adapter.ack(&self.token).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "ack succeeded after retry");
                    }
                    return;
                }
                Err(err) if attempt < COMMIT_MAX_RETRIES => {
                    let delay = COMMIT_BASE_DELAY * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "ack failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        attempt,
                        error = %err,
                        "ack failed permanently; broker will redeliver after ack-wait"
                    );
                    return;
                }
            }
        }
    }

    /// Request immediate redelivery of this message. Single attempt; the
    /// error, if any, is returned to the caller (spec §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::AckFailed`] if the nak call fails.
    pub async fn rollback(&self) -> Result<(), PubSubError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.adapter
            .nak(&self.token)
            .await
            .map_err(|e| PubSubError::AckFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AccountInfo, ConsumerSpec};
    use crate::config::StreamDescriptor;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicU32;

    struct CountingAdapter {
        ack_failures_remaining: AtomicU32,
        ack_calls: AtomicU32,
        nak_calls: AtomicU32,
    }

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    impl BackendAdapter for CountingAdapter {
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
        ) -> BoxFuture<'_, Result<Vec<crate::adapter::Record>, PubSubError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn ack(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            self.ack_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.ack_failures_remaining.load(Ordering::SeqCst);
            Box::pin(async move {
                if remaining > 0 {
                    self.ack_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                    Err(PubSubError::AckFailed("simulated".into()))
                } else {
                    Ok(())
                }
            })
        }
        fn nak(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
            self.nak_calls.fetch_add(1, Ordering::SeqCst);
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

    fn token() -> AckToken {
        AckToken { backend: "1".into() }
    }

    #[tokio::test]
    async fn commit_is_idempotent_from_the_caller_perspective() {
        let adapter = Arc::new(CountingAdapter {
            ack_failures_remaining: AtomicU32::new(0),
            ack_calls: AtomicU32::new(0),
            nak_calls: AtomicU32::new(0),
        });
        let committer = Committer::new(adapter.clone(), token());

        committer.commit().await;
        committer.commit().await;

        assert_eq!(adapter.ack_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commit_retries_on_transient_failure_then_succeeds() {
        let adapter = Arc::new(CountingAdapter {
            ack_failures_remaining: AtomicU32::new(2),
            ack_calls: AtomicU32::new(0),
            nak_calls: AtomicU32::new(0),
        });
        let committer = Committer::new(adapter.clone(), token());

        committer.commit().await;

        assert_eq!(adapter.ack_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rollback_after_commit_is_a_noop() {
        let adapter = Arc::new(CountingAdapter {
            ack_failures_remaining: AtomicU32::new(0),
            ack_calls: AtomicU32::new(0),
            nak_calls: AtomicU32::new(0),
        });
        let committer = Committer::new(adapter.clone(), token());

        committer.commit().await;
        let result = committer.rollback().await;

        assert!(result.is_ok());
        assert_eq!(adapter.nak_calls.load(Ordering::SeqCst), 0);
    }
}
