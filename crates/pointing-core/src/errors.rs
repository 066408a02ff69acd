//! Error types for connection identity resolution.

use thiserror::Error;

/// Why a connection handshake was refused. Refusal is local to the
/// connection: no meeting state is touched and nothing is broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// `meetingId` was absent or blank.
    #[error("missing meetingId")]
    MissingMeetingId,
    /// `userId` was absent or blank.
    #[error("missing userId")]
    MissingUserId,
    /// The resolver rejected the identity for another reason.
    #[error("identity rejected: {0}")]
    Rejected(String),
}

impl HandshakeError {
    /// Short classification string for logging.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingMeetingId => "missing_meeting_id",
            Self::MissingUserId => "missing_user_id",
            Self::Rejected(_) => "rejected",
        }
    }
}
