//! Server-side error types.

use pointing_core::MeetingId;
use thiserror::Error;

/// Failures talking to a meeting's room task.
///
/// None of these reach clients: a closed room means the meeting ended (or
/// emptied) while the caller still held its handle, and callers treat that
/// as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The room task has retired and no longer accepts commands.
    #[error("meeting {0} is closed")]
    Closed(MeetingId),
    /// Every join attempt hit a room that retired underneath it.
    #[error("could not join meeting {meeting_id} after {attempts} attempts")]
    JoinFailed {
        /// Meeting the connection tried to join.
        meeting_id: MeetingId,
        /// How many rooms were tried.
        attempts: usize,
    },
}
