//! Connection supervisor: owns the broker connection, monitors it, and
//! transparently reconnects (spec §4.1).

use crate::adapter::BackendAdapter;
use crate::capability::Metrics;
use crate::error::PubSubError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::interval;

type ResubscribeHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Owns the single broker connection and exposes a narrow probe/invoke
/// surface to the rest of the core.
///
/// The Supervisor never calls back into the Subscription Manager directly;
/// it only ever invokes the resubscribe hook registered via
/// [`ConnectionSupervisor::on_reconnect`], keeping ownership acyclic
/// (spec §9).
pub struct ConnectionSupervisor {
    adapter: Arc<dyn BackendAdapter>,
    metrics: Arc<dyn Metrics>,
    connected: Arc<AtomicBool>,
    retry_interval: Duration,
    shutdown: Arc<Notify>,
}

impl ConnectionSupervisor {
    /// Build a supervisor around an already-constructed adapter. Does not
    /// connect; call [`ConnectionSupervisor::connect`] for that.
    #[must_use]
    pub fn new(adapter: Arc<dyn BackendAdapter>, metrics: Arc<dyn Metrics>, retry_interval: Duration) -> Self {
        Self {
            adapter,
            metrics,
            connected: Arc::new(AtomicBool::new(false)),
            retry_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Attempt the initial connection once. Callers are expected to follow
    /// a failed or successful call with [`ConnectionSupervisor::spawn_monitor`],
    /// which is what actually retries in the background; while no monitor
    /// is running and the connection is down, every other operation
    /// observes [`PubSubError::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns the adapter's connect error verbatim.
    pub async fn connect(&self) -> Result<(), PubSubError> {
        match self.adapter.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "initial connect failed");
                Err(err)
            }
        }
    }

    /// Spawn the background monitor that flips `connected` on a
    /// ping success/failure edge and fires the resubscribe hook on a
    /// false→true transition. Spawned once per supervisor lifetime.
    pub fn spawn_monitor(self: &Arc<Self>, hook: ResubscribeHook) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(this.retry_interval);
            let mut was_connected = this.connected.load(Ordering::SeqCst);
            loop {
                tokio::select! {
                    () = this.shutdown.notified() => {
                        tracing::debug!("connection monitor exiting");
                        return;
                    }
                    _ = ticker.tick() => {
                        let now_connected = if was_connected {
                            this.adapter.ping().await
                        } else {
                            // Not connected: attempt a fresh connect rather than
                            // a lightweight ping so we actually recover.
                            this.adapter.connect().await.is_ok()
                        };
                        this.connected.store(now_connected, Ordering::SeqCst);
                        if !was_connected && now_connected {
                            tracing::info!("connection re-established; resubscribing");
                            hook().await;
                        }
                        was_connected = now_connected;
                    }
                }
            }
        });
    }

    /// True iff a lightweight ping currently succeeds.
    pub async fn is_connected(&self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            let ok = self.adapter.ping().await;
            self.connected.store(ok, Ordering::SeqCst);
            ok
        } else {
            false
        }
    }

    /// Best-effort graceful teardown. Stops the background monitor and
    /// closes the underlying connection exactly once.
    ///
    /// # Errors
    ///
    /// Returns the adapter's close error verbatim.
    pub async fn close(&self) -> Result<(), PubSubError> {
        self.shutdown.notify_waiters();
        self.adapter.close().await
    }

    /// Publish a payload to a subject, incrementing the publish
    /// total/success counters (spec §4.1, §6).
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::NotConnected`] if the probe fails, otherwise
    /// the adapter's publish error verbatim.
    pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), PubSubError> {
        self.metrics
            .increment("app_pubsub_publish_total_count", &[("topic", subject)]);

        if !self.is_connected().await {
            return Err(PubSubError::NotConnected);
        }

        self.adapter.publish(subject, payload).await?;
        self.metrics
            .increment("app_pubsub_publish_success_count", &[("topic", subject)]);
        Ok(())
    }

    /// Access the underlying adapter. Reads are lock-free: the adapter
    /// handle is written once at construction and the client libraries are
    /// assumed thread-safe for concurrent publish/fetch (spec §5).
    #[must_use]
    pub fn adapter(&self) -> Arc<dyn BackendAdapter> {
        Arc::clone(&self.adapter)
    }
}
