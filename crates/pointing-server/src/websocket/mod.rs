//! WebSocket connection management, handshake checks, heartbeat, and the
//! per-connection session loop.

pub mod connection;
pub mod handshake;
pub mod heartbeat;
pub mod session;
