//! Per-meeting room task.
//!
//! Every meeting is owned by a single task that consumes [`RoomCommand`]s
//! from a bounded queue and is the only code touching that meeting's
//! [`SessionState`]. Each mutation and the broadcast it triggers therefore
//! happen as one step, and every member sees broadcasts in the order the
//! room produced them.
//!
//! A room retires when its last connection leaves or the meeting is ended:
//! it first removes its own handle from the registry map (only if that
//! entry is still this generation), then stops reading commands. Commands
//! queued behind the retirement are dropped, and a joiner whose reply is
//! dropped retries against a fresh room.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use pointing_core::{
    ClientEvent, ConnectionId, MeetingId, ParticipantUpdate, ServerEvent, SessionState, Snapshot,
    Ticket, Vote, VoteRequest,
};
use pointing_settings::RoomSettings;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::errors::RoomError;
use crate::websocket::connection::ClientConnection;

/// Behaviour switches for every room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Record `submitVote` even when no ticket is open.
    pub allow_votes_without_ticket: bool,
    /// Capacity of each room's command queue.
    pub command_queue: usize,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self::from(&RoomSettings::default())
    }
}

impl From<&RoomSettings> for RoomPolicy {
    fn from(settings: &RoomSettings) -> Self {
        Self {
            allow_votes_without_ticket: settings.allow_votes_without_ticket,
            command_queue: settings.command_queue.max(1),
        }
    }
}

/// Commands accepted by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    /// Add a connection. The reply fires once the joiner's snapshot is queued.
    Join {
        /// The joining connection.
        connection: Arc<ClientConnection>,
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// An event received from a member connection.
    Event {
        /// Sender.
        connection_id: ConnectionId,
        /// Parsed event.
        event: ClientEvent,
    },
    /// Remove a connection.
    Leave {
        /// The departing connection.
        connection_id: ConnectionId,
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// End the meeting from outside (registry removal).
    Close {
        /// Acknowledgement, sent after the room has retired.
        reply: oneshot::Sender<()>,
    },
    /// Read the current state.
    Snapshot {
        /// Receives the snapshot.
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Cheap, cloneable address of a room task.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    meeting_id: MeetingId,
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Meeting this room owns.
    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    /// Distinguishes successive rooms for the same meeting.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The room task has retired.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RoomError::Closed(self.meeting_id.clone()))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| RoomError::Closed(self.meeting_id.clone()))
    }

    /// Add `connection` to the meeting. On success the connection's queue
    /// already holds the current snapshot.
    pub async fn join(&self, connection: Arc<ClientConnection>) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Join { connection, reply })
            .await
    }

    /// Forward an event from a member connection.
    pub async fn dispatch(
        &self,
        connection_id: &ConnectionId,
        event: ClientEvent,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Event {
            connection_id: connection_id.clone(),
            event,
        })
        .await
    }

    /// Remove a connection and wait until the room has processed it.
    pub async fn leave(&self, connection_id: &ConnectionId) -> Result<(), RoomError> {
        let connection_id = connection_id.clone();
        self.request(|reply| RoomCommand::Leave {
            connection_id,
            reply,
        })
        .await
    }

    /// End the meeting and wait for the room to retire.
    pub async fn close(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Close { reply }).await
    }

    /// Current meeting state.
    pub async fn snapshot(&self) -> Result<Snapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }
}

/// Start a room task for `meeting_id` and return its handle.
///
/// `rooms` is the registry map the room removes itself from on retirement.
pub(crate) fn spawn_room(
    meeting_id: MeetingId,
    generation: u64,
    policy: RoomPolicy,
    rooms: Arc<DashMap<MeetingId, RoomHandle>>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(policy.command_queue);
    let handle = RoomHandle {
        meeting_id: meeting_id.clone(),
        generation,
        tx,
    };
    let span = info_span!("room", meeting_id = %meeting_id, generation);
    let room = Room {
        meeting_id,
        generation,
        policy,
        state: SessionState::new(),
        members: HashMap::new(),
        rooms,
        retired: false,
    };
    drop(tokio::spawn(room.run(rx).instrument(span)));
    handle
}

enum Flow {
    Continue,
    Stop,
}

struct Room {
    meeting_id: MeetingId,
    generation: u64,
    policy: RoomPolicy,
    state: SessionState,
    members: HashMap<ConnectionId, Arc<ClientConnection>>,
    rooms: Arc<DashMap<MeetingId, RoomHandle>>,
    retired: bool,
}

impl Room {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        debug!("room started");
        while let Some(command) = rx.recv().await {
            if let Flow::Stop = self.handle(command) {
                break;
            }
        }
        self.retire();
    }

    fn handle(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join { connection, reply } => {
                self.on_join(connection, reply);
                self.stop_if_empty()
            }
            RoomCommand::Event {
                connection_id,
                event,
            } => {
                if let Flow::Stop = self.on_event(&connection_id, event) {
                    return Flow::Stop;
                }
                self.stop_if_empty()
            }
            RoomCommand::Leave {
                connection_id,
                reply,
            } => {
                self.on_leave(&connection_id);
                let flow = self.stop_if_empty();
                let _ = reply.send(());
                flow
            }
            RoomCommand::Close { reply } => {
                info!("meeting closed by server");
                self.end_meeting();
                let _ = reply.send(());
                Flow::Stop
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
                Flow::Continue
            }
        }
    }

    fn stop_if_empty(&mut self) -> Flow {
        if self.members.is_empty() {
            self.retire();
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn on_join(&mut self, connection: Arc<ClientConnection>, reply: oneshot::Sender<()>) {
        let connection_id = connection.id.clone();
        let roster_changed = self.state.join(connection.context().participant());
        let _ = self
            .members
            .insert(connection_id.clone(), Arc::clone(&connection));

        if !connection.send_event(&ServerEvent::StateUpdate(self.state.snapshot())) {
            warn!(connection_id = %connection_id, "could not queue initial snapshot");
        }
        if roster_changed {
            self.broadcast_except(&self.state_update(), Some(&connection_id));
        }
        info!(
            connection_id = %connection_id,
            user_id = %connection.user_id(),
            members = self.members.len(),
            participants = self.state.roster().len(),
            "connection joined meeting"
        );

        if reply.send(()).is_err() {
            debug!(connection_id = %connection_id, "joiner went away before acknowledgement");
            self.on_leave(&connection_id);
        }
    }

    fn on_leave(&mut self, connection_id: &ConnectionId) {
        let Some(connection) = self.members.remove(connection_id) else {
            return;
        };
        let user_id = connection.user_id();
        let still_connected = self.members.values().any(|m| m.user_id() == user_id);
        let roster_changed = !still_connected && self.state.leave(user_id);
        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            members = self.members.len(),
            "connection left meeting"
        );
        if roster_changed && !self.members.is_empty() {
            self.broadcast(&self.state_update());
        }
    }

    fn on_event(&mut self, connection_id: &ConnectionId, event: ClientEvent) -> Flow {
        let Some(connection) = self.members.get(connection_id).cloned() else {
            debug!(connection_id = %connection_id, event_type = event.event_type(), "event from non-member ignored");
            return Flow::Continue;
        };
        debug!(connection_id = %connection_id, event_type = event.event_type(), "handling event");

        match event {
            ClientEvent::CreateTicket(ticket) => self.create_ticket(&connection, ticket),
            ClientEvent::SubmitVote(request) => self.submit_vote(&connection, request),
            ClientEvent::EndTicket => self.end_ticket(),
            ClientEvent::EndMeeting => {
                info!(user_id = %connection.user_id(), "meeting ended by participant");
                self.end_meeting();
                return Flow::Stop;
            }
            ClientEvent::UpdateParticipant(update) => self.update_participant(&connection, update),
        }
        Flow::Continue
    }

    fn create_ticket(&mut self, connection: &ClientConnection, ticket: Ticket) {
        if !connection.context().role.is_host() {
            debug!(user_id = %connection.user_id(), "ticket created by non-host");
        }
        info!(ticket_id = %ticket.id, "ticket opened");
        self.state.create_ticket(ticket);
        self.broadcast(&self.state_update());
    }

    fn submit_vote(&mut self, connection: &ClientConnection, request: VoteRequest) {
        if self.state.ticket().is_none() && !self.policy.allow_votes_without_ticket {
            debug!(user_id = %connection.user_id(), "vote without an open ticket ignored");
            return;
        }
        let user_id = connection.user_id();
        if let Some(claimed) = request.user_id.as_deref() {
            if claimed != user_id.as_str() {
                warn!(user_id = %user_id, claimed, "vote claimed another user id; using connection identity");
            }
        }
        let display_name = request
            .display_name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.state
                    .roster()
                    .iter()
                    .find(|p| &p.user_id == user_id)
                    .map(|p| p.display_name.clone())
            })
            .unwrap_or_else(|| connection.context().display_name.clone());

        self.state.submit_vote(Vote {
            user_id: user_id.clone(),
            points: request.points,
            display_name,
        });
        if self.state.reveal_ready() {
            debug!("every participant has voted");
        }
        self.broadcast(&self.state_update());
    }

    fn end_ticket(&mut self) {
        if let Some(ticket) = self.state.ticket() {
            info!(ticket_id = %ticket.id, votes = self.state.votes().len(), "ticket ended");
        }
        self.state.end_ticket();
        self.broadcast(&ServerEvent::TicketEnded);
        self.broadcast(&self.state_update());
    }

    fn update_participant(&mut self, connection: &ClientConnection, update: ParticipantUpdate) {
        if self.state.update_participant(
            connection.user_id(),
            update.display_name.as_deref(),
            update.role,
        ) {
            self.broadcast(&self.state_update());
        }
    }

    /// Retire first so late joiners get a fresh room, then notify and
    /// disconnect everyone.
    fn end_meeting(&mut self) {
        self.retire();
        self.broadcast(&ServerEvent::MeetingEnded);
        for connection in self.members.values() {
            connection.close();
        }
        self.members.clear();
    }

    fn retire(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        let generation = self.generation;
        let removed = self
            .rooms
            .remove_if(&self.meeting_id, |_, handle| handle.generation == generation)
            .is_some();
        info!(removed, votes = self.state.votes().len(), "room retired");
    }

    fn state_update(&self) -> ServerEvent {
        ServerEvent::StateUpdate(self.state.snapshot())
    }

    fn broadcast(&self, event: &ServerEvent) {
        self.broadcast_except(event, None);
    }

    /// Serialize once and queue for every member except `skip`.
    fn broadcast_except(&self, event: &ServerEvent, skip: Option<&ConnectionId>) {
        let json = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return;
            }
        };
        for (id, connection) in &self.members {
            if skip == Some(id) {
                continue;
            }
            if !connection.send(Arc::clone(&json)) {
                if connection.is_disconnected() {
                    debug!(connection_id = %id, "member already disconnected");
                } else {
                    warn!(
                        connection_id = %id,
                        event_type = event.event_type(),
                        dropped = connection.drop_count(),
                        "send queue full, message dropped"
                    );
                }
            }
        }
    }
}
