//! Fire-and-forget Redis pub/sub channel adapter (spec §4.6, channel mode).
//!
//! `PUBLISH`/`SUBSCRIBE` have no durability and no acknowledgement concept:
//! a subscriber that is not yet listening misses the message permanently,
//! and `ack`/`nak` are no-ops. The engine's own subscription-manager
//! buffer is the only place back-pressure is felt; a full buffer here is a
//! genuine, permanent drop (spec §4.2 "drop-and-lose").

use crate::error::AdapterError;
use futures::future::BoxFuture;
use futures::StreamExt;
use pubsub_core::{AccountInfo, AckToken, BackendAdapter, ConsumerSpec, PubSubError, Record, StreamDescriptor};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Connection parameters for [`RedisChannelAdapter`].
#[derive(Debug, Clone, Default)]
pub struct RedisChannelAdapterBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    db: Option<i64>,
    tls: bool,
}

impl RedisChannelAdapterBuilder {
    /// Set the Redis host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the Redis port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username for `AUTH`.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password for `AUTH`.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Select a logical database (`REDIS_PUBSUB_DB`).
    #[must_use]
    pub const fn db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    /// Require TLS (`rediss://`).
    #[must_use]
    pub const fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Construct the adapter. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if no host was configured.
    pub fn build(self) -> Result<RedisChannelAdapter, PubSubError> {
        let host = self
            .host
            .ok_or_else(|| PubSubError::ConfigInvalid("redis channel adapter requires a host".into()))?;
        let url = build_url(&host, self.port.unwrap_or(6379), &self.username, &self.password, self.db, self.tls);
        Ok(RedisChannelAdapter {
            url,
            client: RwLock::new(None),
            publish_conn: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            sub_tasks: Mutex::new(HashMap::new()),
        })
    }
}

pub(crate) fn build_url(
    host: &str,
    port: u16,
    username: &Option<String>,
    password: &Option<String>,
    db: Option<i64>,
    tls: bool,
) -> String {
    let scheme = if tls { "rediss" } else { "redis" };
    let auth = match (username, password) {
        (Some(u), Some(p)) => format!("{u}:{p}@"),
        (None, Some(p)) => format!(":{p}@"),
        _ => String::new(),
    };
    let db = db.unwrap_or(0);
    format!("{scheme}://{auth}{host}:{port}/{db}")
}

/// Redis `PUBLISH`/`SUBSCRIBE`-backed [`BackendAdapter`]. No durability, no
/// acknowledgements, no consumer groups.
pub struct RedisChannelAdapter {
    url: String,
    client: RwLock<Option<Client>>,
    publish_conn: RwLock<Option<MultiplexedConnection>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedReceiver<Vec<u8>>>>,
    sub_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RedisChannelAdapter {
    /// Start building an adapter.
    #[must_use]
    pub fn builder() -> RedisChannelAdapterBuilder {
        RedisChannelAdapterBuilder::default()
    }

    async fn ensure_subscribed(&self, topic: &str) -> Result<(), AdapterError> {
        if self.subscriptions.lock().await.contains_key(topic) {
            return Ok(());
        }
        let client = self.client.read().await.clone().ok_or(AdapterError::NotConnected)?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let topic_owned = topic.to_string();
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload = msg.get_payload_bytes().to_vec();
                if tx.send(payload).is_err() {
                    break;
                }
            }
            tracing::debug!(topic = %topic_owned, "channel subscription task ended");
        });

        self.subscriptions.lock().await.insert(topic.to_string(), rx);
        self.sub_tasks.lock().await.insert(topic.to_string(), handle);
        Ok(())
    }
}

impl BackendAdapter for RedisChannelAdapter {
    fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            let client = Client::open(self.url.clone()).map_err(|e| AdapterError::Connect(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;
            *self.client.write().await = Some(client);
            *self.publish_conn.write().await = Some(conn);
            tracing::info!("redis channel adapter connected");
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(mut conn) = self.publish_conn.read().await.clone() else {
                return false;
            };
            redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            for (_, handle) in self.sub_tasks.lock().await.drain() {
                handle.abort();
            }
            self.subscriptions.lock().await.clear();
            self.publish_conn.write().await.take();
            self.client.write().await.take();
            Ok(())
        })
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>> {
        let subject = subject.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let mut conn = self
                .publish_conn
                .read()
                .await
                .clone()
                .ok_or(AdapterError::NotConnected)?;
            conn.publish::<_, _, i64>(&subject, payload)
                .await
                .map_err(|e| PubSubError::PublishFailed { topic: subject, reason: e.to_string() })?;
            Ok(())
        })
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
            self.ensure_subscribed(&topic).await.map_err(PubSubError::from)?;
            let deadline = tokio::time::Instant::now() + max_wait;
            let mut records = Vec::new();
            let mut subs = self.subscriptions.lock().await;
            let Some(rx) = subs.get_mut(&topic) else {
                return Ok(records);
            };
            while (records.len() as u32) < max {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, rx.recv()).await {
                    Ok(Some(payload)) => records.push(Record {
                        payload,
                        headers: HashMap::new(),
                        ack_token: AckToken { backend: String::new() },
                    }),
                    Ok(None) | Err(_) => break,
                }
            }
            Ok(records)
        })
    }

    fn ack(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn nak(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn create_stream(&self, _descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
        // Channels are auto-created by the broker on first publish/subscribe.
        Box::pin(async { Ok(()) })
    }

    fn delete_stream(&self, _name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn delete_consumer(&self, _group: &str, _instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async { Ok(()) })
    }

    fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
        Box::pin(async move {
            let mut conn = self
                .publish_conn
                .read()
                .await
                .clone()
                .ok_or(AdapterError::NotConnected)?;
            let info: String = redis::cmd("INFO")
                .arg("server")
                .query_async(&mut conn)
                .await
                .map_err(|e| AdapterError::Admin(e.to_string()))?;
            Ok(AccountInfo { detail: info })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_a_host() {
        assert!(RedisChannelAdapter::builder().build().is_err());
    }

    #[test]
    fn build_url_includes_auth_and_db() {
        let url = build_url("localhost", 6379, &Some("u".into()), &Some("p".into()), Some(15), false);
        assert_eq!(url, "redis://u:p@localhost:6379/15");
    }

    #[test]
    fn build_url_uses_rediss_scheme_when_tls_enabled() {
        let url = build_url("localhost", 6379, &None, &None, None, true);
        assert_eq!(url, "rediss://localhost:6379/0");
    }
}
