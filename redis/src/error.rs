//! Adapter-local error type, converted into [`pubsub_core::PubSubError`] at
//! the [`pubsub_core::BackendAdapter`] boundary so the core never names
//! the `redis` crate.

use pubsub_core::PubSubError;
use thiserror::Error;

/// Errors raised while talking to a Redis server (channel or stream mode).
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Connecting to the Redis server failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// TLS material could not be loaded.
    #[error("tls failed: {0}")]
    Tls(String),
    /// `AUTH` failed.
    #[error("auth failed: {0}")]
    Auth(String),
    /// Publishing a message (`PUBLISH` or `XADD`) failed.
    #[error("publish failed: {0}")]
    Publish(String),
    /// Reading a batch (`SUBSCRIBE`, `XREADGROUP`, or `XREAD`) failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// `XACK` failed.
    #[error("ack failed: {0}")]
    Ack(String),
    /// A stream/group/key administration call failed.
    #[error("admin failed: {0}")]
    Admin(String),
    /// The adapter was used before [`pubsub_core::BackendAdapter::connect`]
    /// succeeded.
    #[error("not connected")]
    NotConnected,
}

impl From<AdapterError> for PubSubError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Connect(reason) => Self::ConnectRefused(reason),
            AdapterError::Tls(reason) => Self::TlsFailed(reason),
            AdapterError::Auth(reason) => Self::AuthFailed(reason),
            AdapterError::Publish(reason) => Self::PublishFailed {
                topic: String::new(),
                reason,
            },
            AdapterError::Fetch(reason) => Self::FetchFailed {
                topic: String::new(),
                reason,
            },
            AdapterError::Ack(reason) => Self::AckFailed(reason),
            AdapterError::Admin(reason) => Self::AdminFailed(reason),
            AdapterError::NotConnected => Self::NotConnected,
        }
    }
}
