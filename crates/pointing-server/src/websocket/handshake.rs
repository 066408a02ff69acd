//! Upgrade-time checks: origin allow-list and handshake refusals.

use axum::http::StatusCode;
use pointing_core::HandshakeError;

/// Whether a WebSocket upgrade from `origin` is allowed.
///
/// An empty allow-list or a `"*"` entry allows everything. Requests with no
/// `Origin` header (non-browser clients) are always allowed. Comparison
/// ignores a trailing slash and ASCII case.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    if allowed.is_empty() || allowed.iter().any(|o| o == "*") {
        return true;
    }
    let origin = origin.trim_end_matches('/');
    allowed
        .iter()
        .any(|o| o.trim_end_matches('/').eq_ignore_ascii_case(origin))
}

/// HTTP status for a refused handshake: malformed requests are `400`,
/// identities the resolver refused are `403`.
pub fn rejection_status(error: &HandshakeError) -> StatusCode {
    match error {
        HandshakeError::MissingMeetingId | HandshakeError::MissingUserId => {
            StatusCode::BAD_REQUEST
        }
        HandshakeError::Rejected(_) => StatusCode::FORBIDDEN,
    }
}
