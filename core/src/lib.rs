//! Backend-agnostic subscription/consumption engine.
//!
//! This crate implements the parts of the pub/sub system that are the same
//! regardless of which broker backend is wired in underneath: the
//! connection supervisor, the per-topic subscription state machine, the
//! commit/rollback contract, the bounded query engine, and idempotent
//! stream/topic administration. A concrete [`adapter::BackendAdapter`]
//! (provided by a sibling crate — `pubsub-jetstream`, `pubsub-redis`, or a
//! test double from `pubsub-testing`) supplies the actual broker wire
//! protocol; this crate never names one.

pub mod adapter;
pub mod admin;
pub mod capability;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod query;
pub mod registry;
pub mod subscription;
pub mod supervisor;

pub use adapter::{AccountInfo, AckToken, BackendAdapter, ConsumerSpec, DeliverPolicy, Record};
pub use admin::Administrator;
pub use capability::{LogLevel, Logger, Metrics, NoopLogger, NoopMetrics, NoopTracer, Tracer};
pub use config::{BackendMode, EngineConfig, RetentionPolicy, StorageKind, StreamDescriptor, TlsConfig};
pub use error::PubSubError;
pub use health::{HealthReport, HealthReporter, Status};
pub use message::{Committer, Message};
pub use query::{QueryArgs, QueryEngine};
pub use subscription::{SubscriptionManager, SubscriptionManagerConfig};
pub use supervisor::ConnectionSupervisor;
