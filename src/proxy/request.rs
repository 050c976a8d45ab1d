//! Read-only projection of an inbound request.

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, Method, Request, Uri};

use crate::proxy::headers::{Headers, Origin};

/// An inbound request as handed over by the dispatch layer.
///
/// The body is a single-pass stream; it moves into the forwarding call.
#[derive(Debug)]
pub struct RequestView {
    method: Method,
    uri: Uri,
    headers: Headers,
    body: Body,
    peer: Option<SocketAddr>,
}

impl RequestView {
    pub fn new(method: Method, uri: Uri, headers: Headers, body: Body) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            peer: None,
        }
    }

    /// Project an `http::Request`.
    pub fn from_http(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts.method, parts.uri, Headers::from_map(&parts.headers), body)
    }

    /// Record the socket address the request arrived from.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Where the request came from: the peer's IP and the host it asked for
    /// (`Host` header, then URI authority).
    pub fn origin(&self) -> Origin {
        let host = self
            .headers
            .get(header::HOST.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.to_string()));
        Origin {
            client: self.peer.map(|p| p.ip()),
            host,
        }
    }

    /// Split into the parts the mapper needs and the body stream.
    pub(crate) fn into_parts(self) -> (Method, Headers, Body) {
        (self.method, self.headers, self.body)
    }
}
