//! Per-meeting state: the open ticket, the votes cast on it, and who is
//! connected.
//!
//! `SessionState` is a plain data structure with no synchronization of its
//! own. Exactly one task owns it (the meeting's room actor), so every
//! mutation and the snapshot that follows it are observed atomically.

use chrono::{DateTime, Utc};

use crate::ids::UserId;
use crate::protocol::Snapshot;
use crate::types::{Participant, Role, Ticket, Vote};

/// Authoritative state of one meeting.
#[derive(Clone, Debug)]
pub struct SessionState {
    ticket: Option<Ticket>,
    votes: Vec<Vote>,
    roster: Vec<Participant>,
    created_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh meeting: no ticket, no votes, nobody connected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticket: None,
            votes: Vec::new(),
            roster: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The open ticket, if any.
    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    /// Votes in first-vote order.
    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    /// Participants in join order.
    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    /// When this meeting state was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Nobody is connected; the state should be discarded.
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Whether `user_id` is on the roster.
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.roster.iter().any(|p| &p.user_id == user_id)
    }

    /// Add a participant. Returns `false` (and changes nothing) when the
    /// user is already on the roster.
    pub fn join(&mut self, participant: Participant) -> bool {
        if self.has_participant(&participant.user_id) {
            return false;
        }
        self.roster.push(participant);
        true
    }

    /// Remove a participant. Returns `false` when they were not on the roster.
    /// Their vote, if any, stays with the ticket.
    pub fn leave(&mut self, user_id: &UserId) -> bool {
        let before = self.roster.len();
        self.roster.retain(|p| &p.user_id != user_id);
        self.roster.len() != before
    }

    /// Apply a name/role change to a roster entry. Returns `true` if
    /// anything visible changed.
    pub fn update_participant(
        &mut self,
        user_id: &UserId,
        display_name: Option<&str>,
        role: Option<Role>,
    ) -> bool {
        let Some(entry) = self.roster.iter_mut().find(|p| &p.user_id == user_id) else {
            return false;
        };
        let mut changed = false;
        if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
            if entry.display_name != name {
                name.clone_into(&mut entry.display_name);
                changed = true;
            }
        }
        if let Some(role) = role {
            if entry.role != role {
                entry.role = role;
                changed = true;
            }
        }
        changed
    }

    /// Open `ticket`, replacing any current one and discarding all votes.
    pub fn create_ticket(&mut self, ticket: Ticket) {
        self.ticket = Some(ticket);
        self.votes.clear();
    }

    /// Insert or overwrite the vote for `vote.user_id`. An existing vote is
    /// replaced in place, keeping its position.
    pub fn submit_vote(&mut self, vote: Vote) {
        if let Some(existing) = self.votes.iter_mut().find(|v| v.user_id == vote.user_id) {
            *existing = vote;
        } else {
            self.votes.push(vote);
        }
    }

    /// Close the current ticket and discard its votes. The roster is kept.
    pub fn end_ticket(&mut self) {
        self.ticket = None;
        self.votes.clear();
    }

    /// Roster members who have not voted yet.
    pub fn pending_voters(&self) -> Vec<&UserId> {
        self.roster
            .iter()
            .map(|p| &p.user_id)
            .filter(|id| !self.votes.iter().any(|v| &v.user_id == *id))
            .collect()
    }

    /// Every connected participant has voted on an open ticket.
    pub fn reveal_ready(&self) -> bool {
        self.ticket.is_some() && !self.roster.is_empty() && self.pending_voters().is_empty()
    }

    /// Copy of the visible state for broadcasting.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ticket: self.ticket.clone(),
            votes: self.votes.clone(),
            roster: self.roster.clone(),
        }
    }
}
