//! Forwarding failure taxonomy.
//!
//! # Design Decisions
//! - Every failure the core can report before headers are committed is a
//!   `ProxyError` variant; `ErrorKind` is the flat, copyable classification
//!   callers branch on
//! - Nothing here is retried; retry policy lives above the core
//! - Post-header failures cannot become a `ProxyError` returned from `act`;
//!   they surface as a `StreamingFailure` on the relayed body stream

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Flat classification of a forwarding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Inbound path or mapped URI is malformed.
    Mapping,
    /// Upstream host name could not be resolved.
    Resolution,
    /// Upstream refused the connection or is unreachable.
    Connection,
    /// No progress within the configured deadline.
    Timeout,
    /// Malformed status line or header block from upstream.
    Protocol,
    /// Upstream closed while the request body was being written.
    UpstreamWrite,
    /// The caller's own request body stream failed.
    InboundBody,
    /// Response body failed after headers were committed.
    Streaming,
}

impl ErrorKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Mapping => "mapping",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::UpstreamWrite => "upstream_write",
            ErrorKind::InboundBody => "inbound_body",
            ErrorKind::Streaming => "streaming",
        }
    }

    /// True for failures the caller caused rather than the upstream.
    pub fn is_client_side(&self) -> bool {
        matches!(self, ErrorKind::Mapping | ErrorKind::InboundBody)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the exchange in which a deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Establishing the TCP connection.
    Connect,
    /// Waiting for the request body to make progress.
    RequestBody,
    /// Waiting for the upstream status line and headers.
    ResponseHead,
    /// Waiting for the next response body frame.
    BodyIdle,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => f.write_str("connect"),
            TimeoutPhase::RequestBody => f.write_str("request body upload"),
            TimeoutPhase::ResponseHead => f.write_str("response head"),
            TimeoutPhase::BodyIdle => f.write_str("body idle"),
        }
    }
}

/// Errors that can end a forwarding call before a response is relayed.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Inbound request cannot be mapped onto the upstream.
    #[error("cannot map request onto upstream: {0}")]
    Mapping(String),

    /// Upstream host did not resolve.
    #[error("failed to resolve upstream host {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Upstream refused or could not be reached.
    #[error("failed to connect to upstream {authority}: {source}")]
    Connection {
        authority: String,
        #[source]
        source: std::io::Error,
    },

    /// A deadline elapsed.
    #[error("upstream timed out during {phase} after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    /// Upstream sent something that is not a valid HTTP/1.1 response head.
    #[error("upstream protocol error: {0}")]
    Protocol(#[source] hyper::Error),

    /// Upstream stopped accepting the request body.
    #[error("upstream closed while request body was being written: {0}")]
    UpstreamWrite(#[source] hyper::Error),

    /// The inbound body stream yielded an error.
    #[error("inbound request body failed: {0}")]
    InboundBody(#[source] hyper::Error),
}

impl ProxyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Mapping(_) => ErrorKind::Mapping,
            ProxyError::Resolution { .. } => ErrorKind::Resolution,
            ProxyError::Connection { .. } => ErrorKind::Connection,
            ProxyError::Timeout { .. } => ErrorKind::Timeout,
            ProxyError::Protocol(_) => ErrorKind::Protocol,
            ProxyError::UpstreamWrite(_) => ErrorKind::UpstreamWrite,
            ProxyError::InboundBody(_) => ErrorKind::InboundBody,
        }
    }

    /// Classify an error returned by hyper's `send_request`.
    ///
    /// `body_sent` tells whether the last request body frame had already
    /// been handed to the connection.
    pub(crate) fn from_send(err: hyper::Error, body_sent: bool) -> Self {
        if err.is_user() {
            // Our own request body stream is the only user-side source here.
            ProxyError::InboundBody(err)
        } else if err.is_parse() {
            ProxyError::Protocol(err)
        } else if is_write_failure(&err)
            || (!body_sent
                && (err.is_closed()
                    || err.is_canceled()
                    || err.is_incomplete_message()
                    || io_cause(&err).is_some()))
        {
            ProxyError::UpstreamWrite(err)
        } else {
            ProxyError::Protocol(err)
        }
    }
}

/// The I/O error underneath a hyper error, if any.
fn io_cause(err: &hyper::Error) -> Option<&std::io::Error> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

/// Only a write can fail this way.
fn is_write_failure(err: &hyper::Error) -> bool {
    io_cause(err).is_some_and(|io| {
        matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::WriteZero
        )
    })
}

/// Failure while relaying a response body after headers were committed.
///
/// This travels inside the body stream; the status already sent cannot change.
#[derive(Debug, Error)]
pub enum StreamingFailure {
    /// The upstream body stream yielded an I/O or framing error.
    #[error("upstream body stream failed: {0}")]
    Upstream(#[source] hyper::Error),

    /// No body frame arrived within the idle deadline.
    #[error("upstream body stalled for {0:?}")]
    Idle(Duration),
}

impl StreamingFailure {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Streaming
    }
}
