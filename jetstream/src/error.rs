//! Adapter-local error type, converted into [`pubsub_core::PubSubError`] at
//! the [`pubsub_core::BackendAdapter`] boundary so the core never names
//! `async-nats`.

use pubsub_core::PubSubError;
use thiserror::Error;

/// Errors raised while talking to a JetStream-backed NATS server.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Connecting to the NATS server failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// TLS material could not be loaded.
    #[error("tls failed: {0}")]
    Tls(String),
    /// Credentials file could not be read or parsed.
    #[error("auth failed: {0}")]
    Auth(String),
    /// The JetStream context, stream, or consumer could not be established.
    #[error("context init failed: {0}")]
    ContextInit(String),
    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),
    /// Pulling a batch of messages failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// Acknowledging (or nak'ing) a delivery failed.
    #[error("ack failed: {0}")]
    Ack(String),
    /// A stream/consumer administration call failed.
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
            AdapterError::ContextInit(reason) => Self::ContextInitFailed(reason),
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
