//! Shutdown of the listener and the WebSocket sessions it hands off.
//!
//! Upgraded sockets run outside the HTTP server's connection tracking, so
//! each session holds a [`TaskTrackerToken`] from the coordinator. Shutdown
//! cancels the shared token, then waits for the listener and every session
//! to finish: sessions flush their Close frame and leave their meeting first.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] waits by default.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals shutdown and tracks live sessions until they drain.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no sessions and shutdown not yet requested.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a session. Shutdown waits until the returned guard drops.
    pub fn track_session(&self) -> TaskTrackerToken {
        self.sessions.token()
    }

    /// Sessions registered and not yet finished.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal shutdown, then wait up to `timeout` for `listener` and every
    /// tracked session to finish. Returns `false` if the wait timed out.
    pub async fn graceful_shutdown(&self, listener: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining sessions"
        );

        let drain = async {
            let (listener, ()) = tokio::join!(listener, self.sessions.wait());
            if let Err(e) = listener {
                warn!(error = %e, "listener task failed");
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}, abandoning sessions"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
