//! Redis-stream consumer-group adapter (spec §4.6, stream mode):
//! `XADD`/`XREADGROUP`/`XACK`, with pending-entries-list replay and
//! `MAXLEN` trimming.
//!
//! Unlike channel mode, an unacknowledged delivery is not lost: it stays
//! in the consumer's PEL and is returned again by a replay read
//! (`XREADGROUP ... STREAMS key 0`) until it is acked or redelivery limits
//! are reached elsewhere. `nak` is therefore a no-op here — leaving the
//! entry unacked *is* the nak.

use crate::channel::build_url;
use crate::error::AdapterError;
use futures::future::BoxFuture;
use pubsub_core::{AccountInfo, AckToken, BackendAdapter, ConsumerSpec, PubSubError, Record, StreamDescriptor};
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Connection and trimming parameters for [`RedisStreamAdapter`].
#[derive(Debug, Clone, Default)]
pub struct RedisStreamAdapterBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    db: Option<i64>,
    tls: bool,
    maxlen: Option<u64>,
}

impl RedisStreamAdapterBuilder {
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

    /// Select a logical database.
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

    /// Approximate `MAXLEN` applied on every `XADD` (`REDIS_STREAMS_MAXLEN`).
    #[must_use]
    pub const fn maxlen(mut self, maxlen: u64) -> Self {
        self.maxlen = Some(maxlen);
        self
    }

    /// Construct the adapter. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if no host was configured.
    pub fn build(self) -> Result<RedisStreamAdapter, PubSubError> {
        let host = self
            .host
            .ok_or_else(|| PubSubError::ConfigInvalid("redis stream adapter requires a host".into()))?;
        let url = build_url(&host, self.port.unwrap_or(6379), &self.username, &self.password, self.db, self.tls);
        Ok(RedisStreamAdapter {
            url,
            maxlen: self.maxlen,
            client: RwLock::new(None),
            conn: RwLock::new(None),
            consumers: Mutex::new(HashMap::new()),
        })
    }
}

/// Redis `XADD`/`XREADGROUP`/`XACK`-backed [`BackendAdapter`]. One
/// consumer-group registration per topic, recorded by
/// [`BackendAdapter::create_or_update_consumer`] and consulted by every
/// later `fetch`/`ack`.
pub struct RedisStreamAdapter {
    url: String,
    maxlen: Option<u64>,
    client: RwLock<Option<Client>>,
    conn: RwLock<Option<MultiplexedConnection>>,
    consumers: Mutex<HashMap<String, (String, String)>>,
}

impl RedisStreamAdapter {
    /// Start building an adapter.
    #[must_use]
    pub fn builder() -> RedisStreamAdapterBuilder {
        RedisStreamAdapterBuilder::default()
    }

    async fn connection(&self) -> Result<MultiplexedConnection, AdapterError> {
        self.conn.read().await.clone().ok_or(AdapterError::NotConnected)
    }

    async fn group_and_consumer(&self, topic: &str) -> Result<(String, String), AdapterError> {
        self.consumers
            .lock()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| AdapterError::Fetch(format!("no consumer group registered for topic '{topic}'")))
    }
}

fn is_busygroup(err: &redis::RedisError) -> bool {
    err.to_string().to_lowercase().contains("busygroup")
}

impl BackendAdapter for RedisStreamAdapter {
    fn connect(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            let client = Client::open(self.url.clone()).map_err(|e| AdapterError::Connect(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;
            *self.client.write().await = Some(client);
            *self.conn.write().await = Some(conn);
            tracing::info!("redis stream adapter connected");
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(mut conn) = self.conn.read().await.clone() else {
                return false;
            };
            redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            self.conn.write().await.take();
            self.client.write().await.take();
            Ok(())
        })
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> BoxFuture<'_, Result<(), PubSubError>> {
        let subject = subject.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&subject);
            if let Some(maxlen) = self.maxlen {
                cmd.arg("MAXLEN").arg("~").arg(maxlen);
            }
            cmd.arg("*").arg("payload").arg(payload);
            cmd.query_async::<String>(&mut conn)
                .await
                .map_err(|e| PubSubError::PublishFailed { topic: subject, reason: e.to_string() })?;
            Ok(())
        })
    }

    fn create_or_update_consumer(&self, spec: ConsumerSpec) -> BoxFuture<'_, Result<(), PubSubError>> {
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            match redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&spec.filter)
                .arg(&spec.group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async::<()>(&mut conn)
                .await
            {
                Ok(()) => {}
                Err(err) if is_busygroup(&err) => {}
                Err(err) => return Err(AdapterError::Admin(err.to_string()).into()),
            }
            self.consumers
                .lock()
                .await
                .insert(spec.filter.clone(), (spec.group.clone(), spec.instance.clone()));
            Ok(())
        })
    }

    fn fetch(
        &self,
        topic: &str,
        max: u32,
        max_wait: Duration,
        replay: bool,
    ) -> BoxFuture<'_, Result<Vec<Record>, PubSubError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (group, consumer) = self.group_and_consumer(&topic).await.map_err(PubSubError::from)?;
            let mut conn = self.connection().await.map_err(PubSubError::from)?;

            let id = if replay { "0" } else { ">" };
            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP").arg(&group).arg(&consumer).arg("COUNT").arg(max);
            if !replay {
                let block_ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX).max(1);
                cmd.arg("BLOCK").arg(block_ms);
            }
            cmd.arg("STREAMS").arg(&topic).arg(id);

            let reply: Option<StreamReadReply> = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| PubSubError::FetchFailed { topic: topic.clone(), reason: e.to_string() })?;

            let Some(reply) = reply else {
                return Ok(Vec::new());
            };

            let mut records = Vec::new();
            for key in reply.keys {
                for entry in key.ids {
                    let payload = entry
                        .map
                        .get("payload")
                        .and_then(|value| redis::from_redis_value::<Vec<u8>>(value).ok())
                        .unwrap_or_default();
                    records.push(Record {
                        payload,
                        headers: HashMap::new(),
                        ack_token: AckToken {
                            backend: format!("{topic}|{group}|{}", entry.id),
                        },
                    });
                }
            }
            Ok(records)
        })
    }

    fn ack(&self, token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        let backend = token.backend.clone();
        Box::pin(async move {
            let mut parts = backend.splitn(3, '|');
            let (Some(key), Some(group), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
                return Ok(());
            };
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            redis::cmd("XACK")
                .arg(key)
                .arg(group)
                .arg(id)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| AdapterError::Ack(e.to_string()))?;
            Ok(())
        })
    }

    fn nak(&self, _token: &AckToken) -> BoxFuture<'_, Result<(), PubSubError>> {
        // Leaving the entry unacked in the PEL is the nak; the next replay
        // read (id "0") will return it again.
        Box::pin(async { Ok(()) })
    }

    fn create_stream(&self, descriptor: &StreamDescriptor) -> BoxFuture<'_, Result<(), PubSubError>> {
        let descriptor = descriptor.clone();
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            let group = self
                .consumers
                .lock()
                .await
                .get(&descriptor.name)
                .map(|(group, _)| group.clone());
            let Some(group) = group else {
                // No subscription has registered a group for this stream yet;
                // `CreateTopic` in stream mode is expected to run after (or
                // independent of) subscription, so this is a legitimate no-op
                // rather than an error: the group is created lazily by
                // `create_or_update_consumer` on first subscribe.
                return Ok(());
            };
            for subject in &descriptor.subjects {
                match redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(subject)
                    .arg(&group)
                    .arg("$")
                    .arg("MKSTREAM")
                    .query_async::<()>(&mut conn)
                    .await
                {
                    Ok(()) => {}
                    Err(err) if is_busygroup(&err) => {}
                    Err(err) => return Err(AdapterError::Admin(err.to_string()).into()),
                }
            }
            Ok(())
        })
    }

    fn delete_stream(&self, name: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            redis::cmd("DEL")
                .arg(&name)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| AdapterError::Admin(e.to_string()))?;
            self.consumers.lock().await.remove(&name);
            Ok(())
        })
    }

    fn delete_consumer(&self, group: &str, instance: &str) -> BoxFuture<'_, Result<(), PubSubError>> {
        let group = group.to_string();
        let instance = instance.to_string();
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
            let topic = self
                .consumers
                .lock()
                .await
                .iter()
                .find(|(_, (g, _))| g == &group)
                .map(|(topic, _)| topic.clone());
            if let Some(topic) = topic {
                redis::cmd("XGROUP")
                    .arg("DELCONSUMER")
                    .arg(&topic)
                    .arg(&group)
                    .arg(&instance)
                    .query_async::<i64>(&mut conn)
                    .await
                    .map_err(|e| AdapterError::Admin(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn account_info(&self) -> BoxFuture<'_, Result<AccountInfo, PubSubError>> {
        Box::pin(async move {
            let mut conn = self.connection().await.map_err(PubSubError::from)?;
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
        assert!(RedisStreamAdapter::builder().build().is_err());
    }

    #[test]
    fn builder_with_host_succeeds() {
        assert!(RedisStreamAdapter::builder().host("localhost").maxlen(10_000).build().is_ok());
    }
}
