//! Value types shared by the session state and the wire protocol.

use serde::{Deserialize, Serialize};

use crate::ids::{MeetingId, UserId};

/// A vote's point value. Kept as an opaque JSON number: the engine never
/// checks it against the card deck, and interpretation (averages,
/// consensus) belongs to the presentation layer.
pub type Points = serde_json::Number;

/// The item currently under estimation. Stored and echoed, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Host-assigned ticket identifier.
    pub id: String,
    /// Short title shown to voters.
    pub title: String,
    /// Free-form description; empty when the host left it blank.
    #[serde(default)]
    pub description: String,
}

/// One participant's estimate for the open ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Who voted. Votes are unique by this field.
    pub user_id: UserId,
    /// The estimate.
    pub points: Points,
    /// Name to show next to the vote once revealed.
    pub display_name: String,
}

/// Meeting role as reported by the meeting platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Meeting host.
    Host,
    /// Co-host with host privileges.
    CoHost,
    /// Everyone else.
    #[default]
    Participant,
}

impl Role {
    /// Parse the role string from a handshake. Unknown values fall back to
    /// [`Role::Participant`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "host" => Self::Host,
            "co-host" | "cohost" | "co_host" => Self::CoHost,
            _ => Self::Participant,
        }
    }

    /// Whether this role may run the session (create tickets, reveal, end).
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, Self::Host | Self::CoHost)
    }
}

/// A roster entry: someone currently connected to the meeting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Participant identifier, unique within the roster.
    pub user_id: UserId,
    /// Display name supplied at handshake (or the user ID when none was given).
    pub display_name: String,
    /// Meeting role.
    #[serde(default)]
    pub role: Role,
}

/// Identity of one connection, resolved once at handshake and passed into
/// every handler call for that connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Meeting the connection belongs to.
    pub meeting_id: MeetingId,
    /// Who is connected.
    pub user_id: UserId,
    /// Display name, defaulting to the user ID.
    pub display_name: String,
    /// Meeting role.
    pub role: Role,
}

impl ConnectionContext {
    /// The roster entry this connection contributes.
    #[must_use]
    pub fn participant(&self) -> Participant {
        Participant {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }
}
