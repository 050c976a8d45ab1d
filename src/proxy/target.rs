//! Upstream target and URI mapping.
//!
//! # Responsibilities
//! - Parse and validate the configured upstream base URI
//! - Rewrite inbound path + query onto the upstream
//!
//! # Design Decisions
//! - The authority always carries an explicit port
//! - The path prefix is stored without a trailing slash
//! - Inbound path and query are opaque; nothing is decoded or re-encoded

use std::fmt;

use axum::http::Uri;
use thiserror::Error;
use url::Url;

use crate::proxy::error::ProxyError;

/// Errors from parsing an upstream base URI.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid upstream URI: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported upstream scheme {0:?}, only http is supported")]
    Scheme(String),

    #[error("upstream URI has no host")]
    MissingHost,

    #[error("upstream URI must not carry credentials")]
    Credentials,

    #[error("upstream URI must not have a query")]
    Query,

    #[error("upstream URI must not have a fragment")]
    Fragment,
}

/// Immutable upstream base: scheme, host, port, optional path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Host as it appears in an authority (IPv6 literals bracketed).
    host: String,
    port: u16,
    /// Path prefix with no trailing slash; empty for the root.
    prefix: String,
}

impl UpstreamTarget {
    /// Parse `http://host[:port][/prefix]`.
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let url = Url::parse(input)?;

        if url.scheme() != "http" {
            return Err(TargetError::Scheme(url.scheme().to_string()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(TargetError::Credentials);
        }
        if url.query().is_some() {
            return Err(TargetError::Query);
        }
        if url.fragment().is_some() {
            return Err(TargetError::Fragment);
        }

        let host = url.host_str().ok_or(TargetError::MissingHost)?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let prefix = url.path().trim_end_matches('/').to_string();

        Ok(Self { host, port, prefix })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `host:port`, used for the `Host` header and for resolution.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Map an inbound path and query onto this upstream.
    ///
    /// The result path is the prefix and the inbound path joined by exactly
    /// one slash. A missing or empty query yields a URI without `?`.
    pub fn map(&self, inbound_path: &str, inbound_query: Option<&str>) -> Result<Uri, ProxyError> {
        if !inbound_path.starts_with('/') {
            return Err(ProxyError::Mapping(format!(
                "inbound path {inbound_path:?} is not absolute"
            )));
        }

        let rest = inbound_path.trim_start_matches('/');
        let mut path_and_query = String::with_capacity(
            self.prefix.len() + inbound_path.len() + inbound_query.map_or(0, |q| q.len() + 1),
        );
        path_and_query.push_str(&self.prefix);
        path_and_query.push('/');
        path_and_query.push_str(rest);

        if let Some(query) = inbound_query.filter(|q| !q.is_empty()) {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Uri::builder()
            .scheme("http")
            .authority(self.authority())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::Mapping(e.to_string()))
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}{}", self.host, self.port, self.prefix)
    }
}

impl std::str::FromStr for UpstreamTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
