//! Health reporter: combines connection state and a backend probe into an
//! up/down report (spec §4.7 `Health`).

use crate::adapter::BackendAdapter;
use crate::config::BackendMode;
use crate::supervisor::ConnectionSupervisor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Reported health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Connected and the backend probe succeeded within the ping timeout.
    Up,
    /// Either not connected, or the backend probe failed or timed out.
    Down,
}

/// Health snapshot returned by [`HealthReporter::check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall status.
    pub status: Status,
    /// Diagnostic details: always carries `server` and `backend`; carries
    /// `connection_status` and, for jetstream mode, `jetstream_status`.
    pub details: HashMap<String, String>,
}

/// Combines [`ConnectionSupervisor::is_connected`] with an
/// [`BackendAdapter::account_info`] probe bounded by a ping timeout.
pub struct HealthReporter {
    supervisor: Arc<ConnectionSupervisor>,
    adapter: Arc<dyn BackendAdapter>,
    server: String,
    backend_mode: BackendMode,
    ping_timeout: Duration,
}

impl HealthReporter {
    /// Build a reporter around the engine's supervisor and adapter.
    #[must_use]
    pub const fn new(
        supervisor: Arc<ConnectionSupervisor>,
        adapter: Arc<dyn BackendAdapter>,
        server: String,
        backend_mode: BackendMode,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            adapter,
            server,
            backend_mode,
            ping_timeout,
        }
    }

    /// Report up iff the supervisor believes it is connected AND the
    /// backend account-info probe succeeds within `ping_timeout`;
    /// otherwise down with a diagnostic map.
    pub async fn check(&self) -> HealthReport {
        let mut details = HashMap::new();
        details.insert("server".to_string(), self.server.clone());
        details.insert("backend".to_string(), format!("{:?}", self.backend_mode));

        if !self.supervisor.is_connected().await {
            details.insert("connection_status".to_string(), "disconnected".to_string());
            return HealthReport { status: Status::Down, details };
        }
        details.insert("connection_status".to_string(), "connected".to_string());

        let probe = tokio::time::timeout(self.ping_timeout, self.adapter.account_info()).await;
        match probe {
            Ok(Ok(info)) => {
                if self.backend_mode == BackendMode::JetStream {
                    details.insert("jetstream_status".to_string(), info.detail);
                }
                HealthReport { status: Status::Up, details }
            }
            Ok(Err(err)) => {
                details.insert("probe_error".to_string(), err.to_string());
                HealthReport { status: Status::Down, details }
            }
            Err(_) => {
                details.insert("probe_error".to_string(), "account-info probe timed out".to_string());
                HealthReport { status: Status::Down, details }
            }
        }
    }
}
