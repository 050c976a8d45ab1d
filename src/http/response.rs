//! Translating forwarding failures into client-visible responses.
//!
//! - Caller-side problems (unmappable path, broken request body) → 400
//! - Upstream deadlines → 504 Gateway Timeout
//! - Every other upstream failure → 502 Bad Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::proxy::{ErrorKind, ProxyError};

/// Gateway status for a failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Mapping | ErrorKind::InboundBody => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Resolution
        | ErrorKind::Connection
        | ErrorKind::Protocol
        | ErrorKind::UpstreamWrite
        | ErrorKind::Streaming => StatusCode::BAD_GATEWAY,
    }
}

/// Short text response describing `err`.
pub fn error_response(err: &ProxyError) -> Response {
    let kind = err.kind();
    let message = match kind {
        ErrorKind::Mapping => "Request target cannot be forwarded",
        ErrorKind::InboundBody => "Request body could not be read",
        ErrorKind::Timeout => "Upstream timed out",
        ErrorKind::Resolution => "Upstream host could not be resolved",
        ErrorKind::Connection => "Upstream unreachable",
        ErrorKind::Protocol => "Upstream sent an invalid response",
        ErrorKind::UpstreamWrite => "Upstream closed the connection early",
        ErrorKind::Streaming => "Upstream response failed",
    };
    (status_for(kind), message).into_response()
}
