//! Settings structures. Every struct deserializes with `default`, so a
//! settings file only needs to name the values it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointingSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Per-meeting behaviour.
    pub room: RoomSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Origins allowed to connect. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without any frame from it, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Outbound messages buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Directory with the built web client to serve, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_send_queue: 256,
            max_message_size: 64 * 1024,
            static_dir: None,
        }
    }
}

/// Per-meeting behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Accept `submitVote` while no ticket is open.
    pub allow_votes_without_ticket: bool,
    /// Commands buffered per meeting before senders wait.
    pub command_queue: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_votes_without_ticket: false,
            command_queue: 1024,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
