//! Wire protocol between clients and the server.
//!
//! Every frame is a JSON object tagged by `type`, with the payload (if any)
//! under `data`:
//!
//! ```text
//! → {"type":"submitVote","data":{"points":5}}
//! ← {"type":"stateUpdate","data":{"ticket":{…},"votes":[…],"roster":[…]}}
//! ← {"type":"ticketEnded"}
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Participant, Points, Role, Ticket, Vote};

/// Full meeting state as seen by every member.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Open ticket, `null` when none.
    pub ticket: Option<Ticket>,
    /// Votes for the open ticket, in first-vote order.
    pub votes: Vec<Vote>,
    /// Connected participants, in join order.
    pub roster: Vec<Participant>,
}

/// Payload of `submitVote`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// The estimate.
    pub points: Points,
    /// Sender's claimed user ID. Ignored in favour of the handshake identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Name to show with the vote; defaults to the handshake display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Payload of `updateParticipant`: the meeting platform reported a change
/// to the caller's name or role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Client → server events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Open a new ticket, discarding any votes on the previous one.
    CreateTicket(Ticket),
    /// Cast or replace the caller's vote.
    SubmitVote(VoteRequest),
    /// Close the current ticket but keep the meeting alive.
    EndTicket,
    /// Tear the meeting down for everyone.
    EndMeeting,
    /// Refresh the caller's roster entry.
    UpdateParticipant(ParticipantUpdate),
}

impl ClientEvent {
    /// Wire name, for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CreateTicket(_) => "createTicket",
            Self::SubmitVote(_) => "submitVote",
            Self::EndTicket => "endTicket",
            Self::EndMeeting => "endMeeting",
            Self::UpdateParticipant(_) => "updateParticipant",
        }
    }
}

/// Server → client events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full state after a mutation (or on join).
    StateUpdate(Snapshot),
    /// The host closed the current ticket.
    TicketEnded,
    /// The meeting is gone; the connection will be closed.
    MeetingEnded,
}

impl ServerEvent {
    /// Wire name, for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateUpdate(_) => "stateUpdate",
            Self::TicketEnded => "ticketEnded",
            Self::MeetingEnded => "meetingEnded",
        }
    }
}
