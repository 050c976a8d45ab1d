//! Outbound HTTP/1.1 connection per forwarding call.
//!
//! # Responsibilities
//! - Resolve the upstream authority and open a TCP connection
//! - Write method, origin-form target, headers and the streamed body
//! - Wait (bounded) for the status line and headers once the body is sent
//! - Classify every failure into a `ProxyError`
//!
//! # Design Decisions
//! - One connection per call via `hyper::client::conn::http1`; no pool
//! - The connection driver runs in its own task, owned by `ConnectionHandle`;
//!   dropping the handle aborts the task and closes the socket
//! - Bodies with a `Content-Length` are sent with it, others chunked
//! - While the body uploads, the deadline is progress-based (`body_idle`);
//!   the response-head deadline starts after the last body frame
//! - Never retries

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Response, Uri, Version};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;

use crate::config::TimeoutConfig;
use crate::proxy::error::{ProxyError, TimeoutPhase};
use crate::proxy::headers::Headers;
use crate::proxy::upload;

/// Deadlines applied by the connector and the relayed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connection establishment, per resolved address.
    pub connect: Duration,
    /// From the end of the request body until the upstream status line and
    /// headers.
    pub response_head: Duration,
    /// Between two body frames, in either direction.
    pub body_idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response_head: Duration::from_secs(30),
            body_idle: Duration::from_secs(60),
        }
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            response_head: Duration::from_secs(config.response_secs),
            body_idle: Duration::from_secs(config.body_idle_secs),
        }
    }
}

/// The outbound request after mapping and header filtering.
#[derive(Debug)]
pub struct MappedRequest {
    pub method: Method,
    /// Absolute URI on the upstream.
    pub uri: Uri,
    pub headers: Headers,
    pub body: Body,
}

impl MappedRequest {
    /// Build the wire request: origin-form target, `Host` set to the upstream.
    fn into_wire(self) -> Result<(Request<Body>, String), ProxyError> {
        let authority = self
            .uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| ProxyError::Mapping(format!("mapped URI {} has no authority", self.uri)))?;

        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse::<Uri>()
            .map_err(|e| ProxyError::Mapping(e.to_string()))?;

        let mut headers = self
            .headers
            .to_map()
            .map_err(|e| ProxyError::Mapping(format!("invalid header name: {e}")))?;
        let host = HeaderValue::from_str(&authority)
            .map_err(|e| ProxyError::Mapping(format!("invalid upstream authority: {e}")))?;
        headers.insert(header::HOST, host);

        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = target;
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = headers;

        Ok((request, authority))
    }
}

/// Owns the task driving one upstream connection.
///
/// Dropping the handle before the exchange finished aborts the task,
/// closing the socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Let the connection wind down on its own once the exchange is complete.
    pub(crate) fn release(&mut self) {
        self.task.take();
    }

    /// Close the connection now.
    pub(crate) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Upstream status and headers, with the body still on the wire.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub response: Response<Incoming>,
    pub connection: ConnectionHandle,
}

/// Opens one connection per call and forwards a mapped request.
#[derive(Debug, Clone, Default)]
pub struct UpstreamConnector {
    timeouts: Timeouts,
}

impl UpstreamConnector {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Forward `mapped`, returning once the status line and headers arrived.
    pub async fn forward(&self, mapped: MappedRequest) -> Result<UpstreamResponse, ProxyError> {
        let (request, authority) = mapped.into_wire()?;
        let (parts, body) = request.into_parts();
        let (body, mut upload) = upload::track(body);
        let request = Request::from_parts(parts, body);

        let stream = self.connect(&authority).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(ProxyError::Protocol)?;

        let upstream = authority.clone();
        let mut connection = ConnectionHandle::new(tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(upstream = %upstream, error = %e, "Upstream connection ended with error");
            }
        }));

        tracing::trace!(
            upstream = %authority,
            method = %request.method(),
            target = %request.uri(),
            "Sending request to upstream"
        );

        let send = sender.send_request(request);
        tokio::pin!(send);

        // The upstream may answer before the body is complete.
        let early = tokio::select! {
            result = &mut send => Some(result),
            sent = upload.ended(self.timeouts.body_idle) => {
                if !sent {
                    connection.abort();
                    tracing::debug!(upstream = %authority, bytes = upload.bytes(), "Request body upload stalled");
                    return Err(ProxyError::Timeout {
                        phase: TimeoutPhase::RequestBody,
                        after: self.timeouts.body_idle,
                    });
                }
                None
            }
        };

        let result = match early {
            Some(result) => result,
            None => match tokio::time::timeout(self.timeouts.response_head, &mut send).await {
                Ok(result) => result,
                Err(_) => {
                    connection.abort();
                    return Err(ProxyError::Timeout {
                        phase: TimeoutPhase::ResponseHead,
                        after: self.timeouts.response_head,
                    });
                }
            },
        };

        match result {
            Ok(response) => Ok(UpstreamResponse {
                response,
                connection,
            }),
            Err(e) => {
                connection.abort();
                Err(ProxyError::from_send(e, upload.is_done()))
            }
        }
    }

    /// Resolve `authority` and connect to the first address that accepts.
    async fn connect(&self, authority: &str) -> Result<TcpStream, ProxyError> {
        let addrs: Vec<SocketAddr> = lookup_host(authority)
            .await
            .map_err(|source| ProxyError::Resolution {
                host: authority.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ProxyError::Resolution {
                host: authority.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
            });
        }

        let mut last_error = None;
        for addr in addrs {
            match tokio::time::timeout(self.timeouts.connect, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(upstream = %authority, address = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tracing::trace!(upstream = %authority, address = %addr, "Connected to upstream");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(upstream = %authority, address = %addr, error = %e, "Upstream connect failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::debug!(upstream = %authority, address = %addr, "Upstream connect timed out");
                }
            }
        }

        match last_error {
            Some(source) => Err(ProxyError::Connection {
                authority: authority.to_string(),
                source,
            }),
            None => Err(ProxyError::Timeout {
                phase: TimeoutPhase::Connect,
                after: self.timeouts.connect,
            }),
        }
    }
}
