//! Relaying the upstream response back to the caller.
//!
//! # Responsibilities
//! - Copy status and reason phrase verbatim
//! - Filter response headers (hop-by-hop stripped, optional `Via`)
//! - Hand back the body as a lazy stream that owns the upstream connection
//!
//! # Design Decisions
//! - Nothing is buffered; the caller pulls frames straight from the socket
//! - Post-header failures end the stream with an error and are logged, the
//!   status already handed out is never changed
//! - The connection is released when the body ends and aborted if the body is
//!   dropped early

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderName, Response, StatusCode};
use axum::response::IntoResponse;
use hyper::body::{Body as _, Bytes, Frame, Incoming, SizeHint};
use hyper::ext::ReasonPhrase;
use tokio::time::{Instant, Sleep};

use crate::observability::metrics;
use crate::proxy::connector::{ConnectionHandle, UpstreamResponse};
use crate::proxy::error::StreamingFailure;
use crate::proxy::headers::{HeaderFilter, Headers, Hop, Origin};

/// The response handed back to the caller.
#[derive(Debug)]
pub struct ResponseView {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Body,
}

impl ResponseView {
    pub fn new(status: StatusCode, headers: Headers, body: Body) -> Self {
        Self {
            status,
            reason: None,
            headers,
            body,
        }
    }

    /// Attach a reason phrase that differs from the canonical one.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason text as sent by the upstream, else the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Serialize into an `http::Response` for the dispatch layer.
    pub fn into_http(self) -> Response<Body> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => {
                    headers.append(name, value.clone());
                }
                Err(_) => tracing::warn!(header = %name, "Dropping response header with invalid name"),
            }
        }

        if let Some(reason) = self.reason {
            if let Ok(phrase) = ReasonPhrase::try_from(reason.into_bytes()) {
                response.extensions_mut().insert(phrase);
            }
        }
        response
    }
}

impl IntoResponse for ResponseView {
    fn into_response(self) -> axum::response::Response {
        self.into_http()
    }
}

/// Turns a raw upstream response into a `ResponseView`.
#[derive(Debug, Clone)]
pub struct ResponseRelay {
    filter: HeaderFilter,
    body_idle: Duration,
}

impl ResponseRelay {
    pub fn new(filter: HeaderFilter, body_idle: Duration) -> Self {
        Self { filter, body_idle }
    }

    pub fn relay(&self, raw: UpstreamResponse) -> ResponseView {
        let UpstreamResponse {
            response,
            connection,
        } = raw;
        let (parts, body) = response.into_parts();

        let reason = parts
            .extensions
            .get::<ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
        let headers = self
            .filter
            .filter(&Headers::from_map(&parts.headers), Hop::Response, &Origin::default());

        ResponseView {
            status: parts.status,
            reason,
            headers,
            body: Body::new(RelayBody::new(body, connection, self.body_idle)),
        }
    }
}

/// Response body pulled lazily from the upstream connection.
pub struct RelayBody {
    inner: Pin<Box<Incoming>>,
    connection: ConnectionHandle,
    idle_limit: Duration,
    idle: Option<Pin<Box<Sleep>>>,
    done: bool,
}

impl RelayBody {
    fn new(inner: Incoming, connection: ConnectionHandle, idle_limit: Duration) -> Self {
        Self {
            inner: Box::pin(inner),
            connection,
            idle_limit,
            idle: None,
            done: false,
        }
    }

    fn fail(&mut self, failure: StreamingFailure) -> Poll<Option<Result<Frame<Bytes>, StreamingFailure>>> {
        self.done = true;
        self.connection.abort();
        tracing::warn!(kind = %failure.kind(), error = %failure, "Response body truncated");
        metrics::record_streaming_failure();
        Poll::Ready(Some(Err(failure)))
    }
}

impl hyper::body::Body for RelayBody {
    type Data = Bytes;
    type Error = StreamingFailure;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(idle) = this.idle.as_mut() {
                    idle.as_mut().reset(Instant::now() + this.idle_limit);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => this.fail(StreamingFailure::Upstream(e)),
            Poll::Ready(None) => {
                this.done = true;
                this.connection.release();
                Poll::Ready(None)
            }
            Poll::Pending => {
                let limit = this.idle_limit;
                let idle = this
                    .idle
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(limit)));
                if idle.as_mut().poll(cx).is_ready() {
                    return this.fail(StreamingFailure::Idle(limit));
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
