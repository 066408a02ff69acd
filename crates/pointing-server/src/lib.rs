//! # pointing-server
//!
//! Axum HTTP + `WebSocket` server for planning-poker meetings.
//!
//! - `WebSocket` gateway at `/ws`: handshake identity, origin checks, heartbeat
//! - Meeting registry: one room task per live meeting, created on first join
//!   and retired when the last participant leaves or the meeting is ended
//! - Per-meeting broadcast: every state change goes to every member in order
//! - HTTP endpoints: health check, optional static web client
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod registry;
pub mod room;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::RoomError;
pub use registry::SessionRegistry;
pub use room::{RoomHandle, RoomPolicy};
pub use server::PointingServer;
