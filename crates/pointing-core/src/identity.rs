//! Identity resolution at connect time.
//!
//! The meeting platform (its app SDK running in the client) knows who the
//! caller is. The server only sees what the client puts on the handshake
//! URL. [`IdentityResolver`] is the seam where that raw input becomes a
//! [`ConnectionContext`]; [`TrustedHandshake`] accepts it as supplied.

use serde::Deserialize;

use crate::errors::HandshakeError;
use crate::ids::{MeetingId, UserId};
use crate::types::{ConnectionContext, Role};

/// Raw handshake query parameters. Every field is optional here so that a
/// missing value is reported as a [`HandshakeError`] rather than a generic
/// extractor failure.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    /// Meeting to join.
    pub meeting_id: Option<String>,
    /// Caller's participant identifier.
    pub user_id: Option<String>,
    /// Caller's display name.
    pub display_name: Option<String>,
    /// Caller's meeting role (`host`, `co-host`, `participant`).
    pub role: Option<String>,
}

/// Turns handshake parameters into a connection identity.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the identity for a new connection, or refuse it.
    fn resolve(&self, params: &HandshakeParams) -> Result<ConnectionContext, HandshakeError>;
}

/// Trusts the identity exactly as the meeting platform supplied it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustedHandshake;

impl IdentityResolver for TrustedHandshake {
    fn resolve(&self, params: &HandshakeParams) -> Result<ConnectionContext, HandshakeError> {
        let meeting_id = non_blank(params.meeting_id.as_deref()).ok_or(HandshakeError::MissingMeetingId)?;
        let user_id = non_blank(params.user_id.as_deref()).ok_or(HandshakeError::MissingUserId)?;
        let display_name = non_blank(params.display_name.as_deref()).unwrap_or(user_id);

        Ok(ConnectionContext {
            meeting_id: MeetingId::from(meeting_id),
            user_id: UserId::from(user_id),
            display_name: display_name.to_owned(),
            role: params.role.as_deref().map(Role::parse).unwrap_or_default(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
