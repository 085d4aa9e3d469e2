//! Error taxonomy for the subscription/consumption engine.
//!
//! Every variant here corresponds to one of the error "kinds" named in the
//! engine's error handling design, not to a specific backend's error type.
//! Adapter crates define their own error enum and convert it into
//! [`PubSubError`] at the [`crate::adapter::BackendAdapter`] boundary so the
//! core never names a concrete backend.

use thiserror::Error;

/// Errors surfaced by the subscription/consumption engine.
#[derive(Error, Debug, Clone)]
pub enum PubSubError {
    /// Configuration was missing a required field or contained an
    /// unparseable value (empty server address, empty subjects, missing
    /// consumer-group in a durable mode, invalid port, unparseable
    /// duration).
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    /// An operation was attempted while the connection supervisor's probe
    /// is failing. A background reconnect task is already running.
    #[error("not connected to broker")]
    NotConnected,

    /// Authentication with the broker failed during connect.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// TLS material could not be loaded or negotiated during connect.
    #[error("tls failed: {0}")]
    TlsFailed(String),

    /// The broker connection or context could not be established.
    #[error("connect refused: {0}")]
    ConnectRefused(String),

    /// Establishing the higher-level stream/jetstream context on top of the
    /// raw connection failed.
    #[error("context init failed: {0}")]
    ContextInitFailed(String),

    /// A publish operation failed at the backend.
    #[error("publish failed on topic '{topic}': {reason}")]
    PublishFailed {
        /// Topic the publish targeted.
        topic: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// A fetch (batch pull) operation failed at the backend.
    #[error("fetch failed on topic '{topic}': {reason}")]
    FetchFailed {
        /// Topic the fetch targeted.
        topic: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// An acknowledgement (ack or nak) failed at the backend.
    #[error("ack failed: {0}")]
    AckFailed(String),

    /// A handler passed to `SubscribeWithHandler` returned an error. Not a
    /// system fault — results in a Nak and continued consumption.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The fetch loop recognized a backend error string as permanent
    /// (invalid subject, permission denied, wrong type, invalid group) and
    /// terminated rather than retrying forever.
    #[error("permanent subscription error on topic '{topic}': {reason}")]
    PermanentSubscription {
        /// Topic whose fetch loop terminated.
        topic: String,
        /// The backend error string that was recognized as permanent.
        reason: String,
    },

    /// `Subscribe` was called without a configured consumer-group in a
    /// durable backend mode.
    #[error("consumer group missing for durable subscription")]
    ConsumerGroupMissing,

    /// A query operation was given an empty topic.
    #[error("topic must not be empty")]
    EmptyTopic,

    /// A stream/topic administration call failed for a reason other than
    /// "already exists" or "not found" (those are folded into success).
    #[error("admin operation failed: {0}")]
    AdminFailed(String),

    /// Catch-all for backend errors that do not map onto a more specific
    /// kind above.
    #[error("backend error: {0}")]
    Backend(String),
}

impl PubSubError {
    /// True for error kinds that are expected to resolve themselves via
    /// broker-side redelivery or supervisor reconnection, and therefore
    /// should be logged rather than bubbled up through a blocking API like
    /// `Subscribe`.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::FetchFailed { .. } | Self::AckFailed(_)
        )
    }
}
