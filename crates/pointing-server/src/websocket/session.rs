//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use pointing_core::{ClientEvent, ConnectionContext};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::run_heartbeat;
use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::room::RoomHandle;

/// How long the writer gets to flush queued messages after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the socket.
    ClientClosed,
    /// The socket failed in either direction.
    TransportError,
    /// No frame arrived within the heartbeat timeout.
    TimedOut,
    /// The meeting was ended and the room closed this connection.
    MeetingEnded,
    /// The server is shutting down.
    ServerShutdown,
}

impl DisconnectReason {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::TimedOut => "timed_out",
            Self::MeetingEnded => "meeting_ended",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

/// Decrements the live connection count when the session ends.
struct ConnectionGauge(Arc<AtomicUsize>);

impl ConnectionGauge {
    fn new(count: Arc<AtomicUsize>) -> Self {
        let _ = count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Extract the text of a data frame. Binary frames are accepted when they
/// hold UTF-8.
fn frame_text(msg: &Message) -> Option<&str> {
    match msg {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(data) => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// Parse a client frame. Malformed frames are logged and skipped.
fn parse_event(text: &str) -> Option<ClientEvent> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, len = text.len(), "ignoring malformed client frame");
            None
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Joins the meeting; the room queues the current snapshot first
/// 2. Forwards outbound broadcasts and sends periodic Ping frames
/// 3. Dispatches inbound frames to the room as events
/// 4. Ends on client close, socket error, heartbeat timeout, meeting end or
///    server shutdown, then leaves the meeting
#[instrument(skip_all, fields(
    meeting_id = %context.meeting_id,
    user_id = %context.user_id,
))]
pub async fn run_ws_session(
    mut ws: WebSocket,
    context: ConnectionContext,
    registry: Arc<SessionRegistry>,
    config: Arc<ServerConfig>,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    let _gauge = ConnectionGauge::new(connections);
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.max_send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(context, send_tx));

    let room = match registry.join(Arc::clone(&connection)).await {
        Ok(room) => room,
        Err(e) => {
            warn!(error = %e, "failed to join meeting");
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
    };
    info!(connection_id = %connection.id, "client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let mut outbound = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        config.heartbeat_interval(),
    ));

    let heartbeat_cancel = CancellationToken::new();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&connection),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        heartbeat_cancel.clone(),
    ));

    let mut outbound_done = false;
    let reason = loop {
        tokio::select! {
            () = connection.closed() => break DisconnectReason::MeetingEnded,
            () = shutdown.cancelled() => break DisconnectReason::ServerShutdown,
            _ = &mut heartbeat => {
                warn!(
                    idle_ms = u64::try_from(connection.last_seen_elapsed().as_millis()).unwrap_or(u64::MAX),
                    "client unresponsive, disconnecting"
                );
                break DisconnectReason::TimedOut;
            }
            _ = &mut outbound, if !outbound_done => {
                outbound_done = true;
                break DisconnectReason::TransportError;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(msg)) => {
                    connection.mark_alive();
                    if let Message::Close(_) = msg {
                        debug!("client sent close frame");
                        break DisconnectReason::ClientClosed;
                    }
                    let Some(text) = frame_text(&msg) else { continue };
                    if let Some(event) = parse_event(text) {
                        dispatch(&room, &connection, event).await;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive failed");
                    break DisconnectReason::TransportError;
                }
                None => break DisconnectReason::ClientClosed,
            },
        }
    };

    heartbeat_cancel.cancel();
    heartbeat.abort();
    connection.close();
    if !outbound_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut outbound).await.is_err() {
        outbound.abort();
    }

    if room.leave(&connection.id).await.is_err() {
        debug!("meeting already closed");
    }

    info!(
        connection_id = %connection.id,
        reason = reason.as_str(),
        duration_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
}

async fn dispatch(room: &RoomHandle, connection: &ClientConnection, event: ClientEvent) {
    let event_type = event.event_type();
    if room.dispatch(&connection.id, event).await.is_err() {
        debug!(event_type, "meeting closed, event dropped");
    }
}

/// Forward queued messages to the socket and send pings until the
/// connection is closed, then flush what is left and send a Close frame.
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => match msg {
                Some(text) => {
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
            () = connection.closed() => break,
        }
    }

    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}
