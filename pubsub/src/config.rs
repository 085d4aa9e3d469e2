//! Environment-driven configuration (spec §6, §10.3).
//!
//! Parsing uses `std::env` directly, matching the hand-rolled
//! `from_env`/`ConfigError` style already used elsewhere in this workspace
//! rather than pulling in an external config crate.

use pubsub_core::{BackendMode, EngineConfig, PubSubError, RetentionPolicy, StorageKind, StreamDescriptor, TlsConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which Redis API the engine is wired against (`REDIS_PUBSUB_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisPubSubMode {
    /// `XADD`/`XREADGROUP`/`XACK` consumer-group streams.
    Streams,
    /// `PUBLISH`/`SUBSCRIBE` fire-and-forget channels.
    Pubsub,
}

/// Redis connection parameters the backend-agnostic [`EngineConfig`] does
/// not carry (host/port/credentials are adapter construction details, not
/// core subscription state).
#[derive(Debug, Clone)]
pub struct RedisConnection {
    /// Redis host (`REDIS_HOST`).
    pub host: String,
    /// Redis port (`REDIS_PORT`, default 6379).
    pub port: u16,
    /// `AUTH` username (`REDIS_USER`).
    pub username: Option<String>,
    /// `AUTH` password (`REDIS_PASSWORD`).
    pub password: Option<String>,
    /// Logical database for stream mode (`REDIS_DB`, default 0).
    pub db: i64,
    /// Logical database for channel mode (`REDIS_PUBSUB_DB`, default 15).
    pub pubsub_db: i64,
    /// Require TLS (`REDIS_TLS_ENABLED`).
    pub tls_enabled: bool,
    /// Which API to use.
    pub mode: RedisPubSubMode,
    /// Approximate `MAXLEN` applied on every `XADD` (`REDIS_STREAMS_MAXLEN`).
    pub maxlen: Option<u64>,
    /// `XREADGROUP` block timeout (`REDIS_STREAMS_BLOCK_TIMEOUT`).
    pub block_timeout: Option<Duration>,
}

/// NATS/JetStream connection parameters not carried by [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct JetStreamConnection {
    /// NATS server address(es) (`SERVER`).
    pub server: String,
    /// Path to a NATS credentials file (`CREDS_FILE`).
    pub creds_file: Option<String>,
}

/// Everything needed to construct a [`crate::PubSub`] facade: the
/// backend-agnostic [`EngineConfig`] plus whichever backend-specific
/// connection block the configured mode requires.
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Backend-agnostic engine configuration.
    pub engine: EngineConfig,
    /// Present iff `engine.backend_mode` is a Redis mode.
    pub redis: Option<RedisConnection>,
    /// Present iff `engine.backend_mode` is [`BackendMode::JetStream`].
    pub jetstream: Option<JetStreamConnection>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, PubSubError>
where
    T: FromStr,
{
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| PubSubError::ConfigInvalid(format!("{key} is not a valid value: '{raw}'"))),
    }
}

fn env_duration_secs(key: &str) -> Result<Option<Duration>, PubSubError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_secs))
}

fn env_duration_millis(key: &str) -> Result<Option<Duration>, PubSubError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

fn require(key: &str, backend: &str) -> Result<String, PubSubError> {
    env_var(key).ok_or_else(|| PubSubError::ConfigInvalid(format!("{key} is required for the {backend} backend")))
}

impl FacadeConfig {
    /// Build configuration from the environment variables spec §6
    /// enumerates for both backend families.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::ConfigInvalid`] if `PUBSUB_BACKEND` is
    /// missing or unrecognized, if a key required by the selected backend
    /// is absent, or if any value fails to parse.
    pub fn from_env() -> Result<Self, PubSubError> {
        let backend = require("PUBSUB_BACKEND", "engine")?;
        let buffer_size = env_parse::<usize>("REDIS_PUBSUB_BUFFER_SIZE")?.unwrap_or(100);
        let query_timeout = env_duration_secs("REDIS_PUBSUB_QUERY_TIMEOUT")?.unwrap_or(Duration::from_secs(5));
        let query_limit = env_parse::<usize>("REDIS_PUBSUB_QUERY_LIMIT")?.unwrap_or(10);

        match backend.to_uppercase().as_str() {
            "NATS-JETSTREAM" => Self::from_env_jetstream(buffer_size, query_timeout, query_limit),
            "REDIS" => Self::from_env_redis(buffer_size, query_timeout, query_limit),
            other => Err(PubSubError::ConfigInvalid(format!(
                "unrecognized PUBSUB_BACKEND '{other}' (expected REDIS or NATS-JETSTREAM)"
            ))),
        }
    }

    fn from_env_jetstream(
        buffer_size: usize,
        query_timeout: Duration,
        query_limit: usize,
    ) -> Result<Self, PubSubError> {
        let server = require("SERVER", "NATS-JETSTREAM")?;
        let stream_name = require("STREAM", "NATS-JETSTREAM")?;
        let subjects: Vec<String> = require("SUBJECTS", "NATS-JETSTREAM")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let creds_file = env_var("CREDS_FILE");
        let batch_size = env_parse::<u32>("BATCH_SIZE")?.unwrap_or(100);
        let max_wait = env_duration_secs("MAX_WAIT")?.unwrap_or(Duration::from_secs(5));
        let ack_wait = env_duration_secs("MAX_PULL_WAIT")?.unwrap_or(Duration::from_secs(30));

        let engine = EngineConfig {
            server: server.clone(),
            credentials: creds_file.clone(),
            tls: None,
            backend_mode: BackendMode::JetStream,
            stream: StreamDescriptor {
                name: stream_name,
                subjects,
                max_deliver: -1,
                max_age: Duration::from_secs(0),
                max_bytes: 0,
                storage: StorageKind::File,
                retention: RetentionPolicy::Limits,
            },
            consumer_group: env_var("CONSUMER"),
            consumer_instance: None,
            batch_size,
            max_wait,
            ack_wait,
            buffer_size,
            query_timeout,
            query_limit,
            retry_interval: Duration::from_secs(10),
        };
        engine.validate()?;

        Ok(Self {
            engine,
            redis: None,
            jetstream: Some(JetStreamConnection { server, creds_file }),
        })
    }

    fn from_env_redis(buffer_size: usize, query_timeout: Duration, query_limit: usize) -> Result<Self, PubSubError> {
        let host = require("REDIS_HOST", "REDIS")?;
        let port = env_parse::<u16>("REDIS_PORT")?.unwrap_or(6379);
        let db = env_parse::<i64>("REDIS_DB")?.unwrap_or(0);
        let pubsub_db = env_parse::<i64>("REDIS_PUBSUB_DB")?.unwrap_or(15);
        let tls_enabled = env_parse::<bool>("REDIS_TLS_ENABLED")?.unwrap_or(false);

        let mode = match env_var("REDIS_PUBSUB_MODE").as_deref() {
            None | Some("streams") => RedisPubSubMode::Streams,
            Some("pubsub") => RedisPubSubMode::Pubsub,
            Some(other) => {
                return Err(PubSubError::ConfigInvalid(format!(
                    "unrecognized REDIS_PUBSUB_MODE '{other}' (expected streams or pubsub)"
                )))
            }
        };
        let backend_mode = if mode == RedisPubSubMode::Streams {
            BackendMode::RedisStream
        } else {
            BackendMode::RedisChannel
        };

        let consumer_group = env_var("REDIS_STREAMS_CONSUMER_GROUP");
        if backend_mode == BackendMode::RedisStream && consumer_group.as_ref().is_none_or(String::is_empty) {
            return Err(PubSubError::ConfigInvalid(
                "REDIS_STREAMS_CONSUMER_GROUP is required in streams mode".into(),
            ));
        }

        let maxlen = env_parse::<u64>("REDIS_STREAMS_MAXLEN")?;
        let block_timeout = env_duration_millis("REDIS_STREAMS_BLOCK_TIMEOUT")?;
        let max_wait = block_timeout.unwrap_or(Duration::from_secs(5));

        let tls = tls_enabled.then(|| TlsConfig {
            ca_cert: env_var("REDIS_TLS_CA_CERT"),
            cert: env_var("REDIS_TLS_CERT"),
            key: env_var("REDIS_TLS_KEY"),
        });

        let engine = EngineConfig {
            server: format!("{host}:{port}"),
            credentials: None,
            tls,
            backend_mode,
            // Redis topics/streams are created ad hoc via CreateTopic,
            // not from one fixed descriptor at connect time (unlike
            // jetstream's single configured STREAM/SUBJECTS pair); the
            // defaults here only seed CreateTopic's per-call descriptor.
            stream: StreamDescriptor {
                name: String::new(),
                subjects: Vec::new(),
                max_deliver: 5,
                max_age: Duration::from_secs(0),
                max_bytes: 0,
                storage: StorageKind::File,
                retention: RetentionPolicy::Limits,
            },
            consumer_group,
            consumer_instance: env_var("REDIS_STREAMS_CONSUMER_NAME"),
            batch_size: 100,
            max_wait,
            ack_wait: Duration::from_secs(30),
            buffer_size,
            query_timeout,
            query_limit,
            retry_interval: Duration::from_secs(10),
        };
        if engine.server.is_empty() || engine.buffer_size == 0 || engine.batch_size == 0 {
            return Err(PubSubError::ConfigInvalid("invalid redis engine configuration".into()));
        }

        Ok(Self {
            engine,
            redis: Some(RedisConnection {
                host,
                port,
                username: env_var("REDIS_USER"),
                password: env_var("REDIS_PASSWORD"),
                db,
                pubsub_db,
                tls_enabled,
                mode,
                maxlen,
                block_timeout,
            }),
            jetstream: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "PUBSUB_BACKEND",
            "SERVER",
            "STREAM",
            "SUBJECTS",
            "CREDS_FILE",
            "CONSUMER",
            "BATCH_SIZE",
            "MAX_WAIT",
            "MAX_PULL_WAIT",
            "REDIS_HOST",
            "REDIS_PORT",
            "REDIS_DB",
            "REDIS_PUBSUB_DB",
            "REDIS_TLS_ENABLED",
            "REDIS_PUBSUB_MODE",
            "REDIS_STREAMS_CONSUMER_GROUP",
            "REDIS_STREAMS_MAXLEN",
            "REDIS_STREAMS_BLOCK_TIMEOUT",
            "REDIS_PUBSUB_BUFFER_SIZE",
            "REDIS_PUBSUB_QUERY_TIMEOUT",
            "REDIS_PUBSUB_QUERY_LIMIT",
        ] {
            // SAFETY: tests hold `ENV_LOCK` for the duration of any env
            // mutation, so no other thread observes a torn state.
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn from_env_requires_pubsub_backend() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_all();

        let result = FacadeConfig::from_env();

        assert!(matches!(result, Err(PubSubError::ConfigInvalid(_))));
    }

    #[test]
    fn from_env_builds_jetstream_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_all();
        unsafe {
            env::set_var("PUBSUB_BACKEND", "NATS-JETSTREAM");
            env::set_var("SERVER", "localhost:4222");
            env::set_var("STREAM", "orders");
            env::set_var("SUBJECTS", "orders,orders.eu");
            env::set_var("CONSUMER", "billing");
        }

        let config = FacadeConfig::from_env().expect("config should build");

        assert_eq!(config.engine.backend_mode, BackendMode::JetStream);
        assert_eq!(config.engine.stream.subjects, vec!["orders", "orders.eu"]);
        assert!(config.jetstream.is_some());
        assert!(config.redis.is_none());
        clear_all();
    }

    #[test]
    fn from_env_redis_streams_requires_consumer_group() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_all();
        unsafe {
            env::set_var("PUBSUB_BACKEND", "REDIS");
            env::set_var("REDIS_HOST", "localhost");
        }

        let result = FacadeConfig::from_env();

        assert!(matches!(result, Err(PubSubError::ConfigInvalid(_))));
        clear_all();
    }

    #[test]
    fn from_env_redis_pubsub_mode_does_not_require_consumer_group() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_all();
        unsafe {
            env::set_var("PUBSUB_BACKEND", "REDIS");
            env::set_var("REDIS_HOST", "localhost");
            env::set_var("REDIS_PUBSUB_MODE", "pubsub");
        }

        let config = FacadeConfig::from_env().expect("config should build");

        assert_eq!(config.engine.backend_mode, BackendMode::RedisChannel);
        let redis = config.redis.expect("redis connection block");
        assert_eq!(redis.pubsub_db, 15);
        clear_all();
    }
}
