//! # pointing-core
//!
//! Shared vocabulary for the pointing server:
//!
//! - **Branded IDs**: `MeetingId`, `UserId`, `ConnectionId` as newtypes for type safety
//! - **Value types**: `Ticket`, `Vote`, `Participant`, `ConnectionContext`
//! - **Session state**: `SessionState`, the per-meeting record of ticket, votes and roster
//! - **Protocol**: `ClientEvent` / `ServerEvent` wire messages and the `Snapshot` payload
//! - **Identity**: `IdentityResolver` seam for the meeting platform that supplies who is connecting
//! - **Errors**: `HandshakeError` via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod protocol;
pub mod session;
pub mod types;

pub use errors::HandshakeError;
pub use identity::{HandshakeParams, IdentityResolver, TrustedHandshake};
pub use ids::{ConnectionId, MeetingId, UserId};
pub use protocol::{ClientEvent, ParticipantUpdate, ServerEvent, Snapshot, VoteRequest};
pub use session::SessionState;
pub use types::{ConnectionContext, Participant, Points, Role, Ticket, Vote};
