//! Request handler capability.
//!
//! A take turns one request into one response. The proxy is one take; the
//! dispatch layer decides which take serves a request and does not care
//! which implementation it holds.

use std::future::Future;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use hyper::body::Bytes;

use crate::proxy::error::ProxyError;
use crate::proxy::headers::Headers;
use crate::proxy::orchestrator::Proxy;
use crate::proxy::relay::ResponseView;
use crate::proxy::request::RequestView;

/// Maps an inbound request to a response.
pub trait Take: Send + Sync + 'static {
    fn act(&self, request: RequestView) -> impl Future<Output = Result<ResponseView, ProxyError>> + Send;
}

impl Take for Proxy {
    fn act(&self, request: RequestView) -> impl Future<Output = Result<ResponseView, ProxyError>> + Send {
        Proxy::act(self, request)
    }
}

/// Answers every request with the same status and text body.
#[derive(Debug, Clone)]
pub struct FixedTake {
    status: StatusCode,
    body: Bytes,
}

impl FixedTake {
    /// `200 OK` with a `text/plain` body.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    fn respond(&self) -> ResponseView {
        let mut headers = Headers::new();
        headers.append(
            header::CONTENT_TYPE.as_str(),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        ResponseView::new(self.status, headers, Body::from(self.body.clone()))
    }
}

impl Take for FixedTake {
    async fn act(&self, _request: RequestView) -> Result<ResponseView, ProxyError> {
        Ok(self.respond())
    }
}
