//! Redis backend adapters: fire-and-forget pub/sub channels, and
//! consumer-group streams with PEL recovery and trimming.
//!
//! Two concrete [`pubsub_core::BackendAdapter`] implementations live here,
//! selected at construction time by the caller (normally the facade, from
//! `REDIS_PUBSUB_MODE`): [`RedisChannelAdapter`] wraps Redis's native
//! `PUBLISH`/`SUBSCRIBE`, and [`RedisStreamAdapter`] wraps `XADD` /
//! `XREADGROUP` / `XACK` for durable, acknowledged, consumer-group
//! consumption.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod stream;

pub use channel::RedisChannelAdapter;
pub use error::AdapterError;
pub use stream::RedisStreamAdapter;
