//! Consumer registry: topic → durable consumer descriptor (spec §2, §3).

use std::time::Instant;

/// Characters a durable-consumer or stream-subject identifier forbids
/// across the backends this engine targets (NATS subjects reserve `.` `*`
/// `>`; Redis keys and consumer-group names reject whitespace and `:`
/// informally). Each is replaced with `_` when deriving a consumer name
/// from a topic (spec §8 boundary behaviour).
const UNSAFE_CHARS: [char; 5] = ['.', '*', '>', ':', ' '];

/// Deterministically derive a durable consumer name from a configured base
/// plus the topic it is subscribing to.
///
/// Stable for the lifetime of the process once computed (spec §3
/// invariant): callers are expected to memoize the result per topic rather
/// than call this more than once per topic.
#[must_use]
pub fn consumer_name(base: &str, topic: &str) -> String {
    format!("{base}-{}", sanitize_topic(topic))
}

/// Replace every unsafe character in `topic` with `_`.
#[must_use]
pub fn sanitize_topic(topic: &str) -> String {
    topic.replace(UNSAFE_CHARS.as_slice(), "_")
}

/// Per-topic durable consumer record (stream modes only). Keyed by topic
/// within a single engine.
#[derive(Debug, Clone)]
pub struct StreamConsumerRecord {
    /// Stream name the consumer reads from.
    pub stream: String,
    /// Consumer-group name.
    pub group: String,
    /// Consumer-instance name.
    pub instance: String,
}

/// Derive a consumer-instance name from host identity, process identity,
/// and a monotonic timestamp captured once at engine start (spec §3, §11).
///
/// The result is computed once by the caller (typically at
/// `Engine::connect`) and reused for the process lifetime.
#[must_use]
pub fn default_instance_name(started_at: Instant) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    // `started_at` only needs to vary across process restarts on the same
    // host/pid within the same second; elapsed-since-epoch isn't available
    // without a wall-clock dependency, so we fold in the monotonic instant
    // via its pointer-stable address as a cheap, deterministic-enough
    // per-process salt.
    let salt = format!("{started_at:?}");
    let mut hash: u64 = 1469598103934665603;
    for byte in salt.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(1_099_511_628_211);
    }
    format!("{}-{pid}-{hash:x}", sanitize_topic(&host))
}
