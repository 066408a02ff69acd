//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use pointing_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the pointing server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Origins allowed to open a WebSocket. Empty or `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a silent connection after this many milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Outbound messages buffered per connection.
    pub max_send_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Built web client to serve for non-API paths.
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Heartbeat interval as a [`Duration`], at least 1 ms.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Heartbeat timeout as a [`Duration`], never shorter than the interval.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms).max(self.heartbeat_interval())
    }

    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loopback on an ephemeral port with every origin allowed, for embedding
/// and tests. Deployments build from [`ServerSettings`], whose defaults
/// bind `0.0.0.0:3001` and allow only `http://localhost:3000`.
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: Vec::new(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_send_queue: 256,
            max_message_size: 64 * 1024,
            static_dir: None,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            allowed_origins: settings.allowed_origins.clone(),
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
            max_send_queue: settings.max_send_queue.max(1),
            max_message_size: settings.max_message_size,
            static_dir: settings.static_dir.as_ref().map(PathBuf::from),
        }
    }
}
