//! Ordered header multimap and hop filtering.
//!
//! # Responsibilities
//! - Keep headers as an ordered sequence of (name, value) pairs
//! - Case-insensitive lookup through a lowercase index
//! - Strip hop-by-hop headers on both legs
//! - Append the forwarding-context headers on the request leg
//!
//! # Design Decisions
//! - A plain `Vec` keeps the relative order of interleaved headers inside the
//!   views; `http::HeaderMap` groups values by name
//! - On the wire the order of values sharing a name and the order of first
//!   occurrences survive; interleaved duplicates are grouped, which RFC 9110
//!   section 5.3 allows
//! - Names keep their original casing; values are untouched bytes
//! - Headers named inside `Connection` are hop-by-hop for that message

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Headers that describe a single connection and are never forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is a hop-by-hop header that should not be forwarded.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Ordered header multimap with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
    index: HashMap<String, Vec<usize>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an `http::HeaderMap`, keeping every value.
    pub fn from_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map.iter() {
            headers.append(name.as_str(), value.clone());
        }
        headers
    }

    /// Append a header, keeping any existing values.
    pub fn append(&mut self, name: impl Into<String>, value: HeaderValue) {
        let name = name.into();
        self.index
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(self.entries.len());
        self.entries.push((name, value));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|positions| positions.first())
            .map(|&i| &self.entries[i].1)
    }

    /// All values for `name` in original order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.index
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(move |&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Keep only the pairs for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &HeaderValue) -> bool) {
        let entries = std::mem::take(&mut self.entries);
        self.index.clear();
        for (name, value) in entries {
            if keep(&name, &value) {
                self.append(name, value);
            }
        }
    }

    /// Iterate pairs in original order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into an `http::HeaderMap` for the wire.
    ///
    /// Values of one name stay in order and names keep the order of their
    /// first occurrence. Fails on the first name that is not a valid token.
    pub fn to_map(&self) -> Result<HeaderMap, axum::http::header::InvalidHeaderName> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            map.append(HeaderName::from_bytes(name.as_bytes())?, value.clone());
        }
        Ok(map)
    }

    /// Append `value` to the last occurrence of `name` as `existing, value`,
    /// or add the header if absent.
    fn extend_list(&mut self, name: &str, value: &str) {
        let last = self
            .index
            .get(&name.to_ascii_lowercase())
            .and_then(|positions| positions.last().copied());

        if let Some(i) = last {
            let mut joined = self.entries[i].1.as_bytes().to_vec();
            joined.extend_from_slice(b", ");
            joined.extend_from_slice(value.as_bytes());
            match HeaderValue::from_bytes(&joined) {
                Ok(v) => self.entries[i].1 = v,
                Err(_) => tracing::warn!(header = %name, value = %value, "Rejected header list entry, header left unchanged"),
            }
            return;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => self.append(name, v),
            Err(_) => tracing::warn!(header = %name, value = %value, "Rejected synthesized header value, header not added"),
        }
    }
}

/// Which leg of the exchange a header set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Request,
    Response,
}

/// Placeholder recorded when the client address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Who the original request came from, as seen by the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    /// Address of the connecting client.
    pub client: Option<IpAddr>,
    /// Host the client asked for.
    pub host: Option<String>,
}

/// Decides which headers cross the proxy and which are synthesized.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    /// Header recording the client address, or `None` when disabled.
    forwarded_for: Option<String>,
    /// Header recording the requested host, or `None` when disabled.
    forwarded_host: Option<String>,
    /// Token appended to `Via` on the response leg.
    via: Option<String>,
}

impl Default for HeaderFilter {
    fn default() -> Self {
        Self {
            forwarded_for: Some("X-Forwarded-For".to_string()),
            forwarded_host: Some("X-Forwarded-Host".to_string()),
            via: None,
        }
    }
}

impl HeaderFilter {
    /// A filter adding only the client-address header and `Via`.
    pub fn new(forwarded_for: Option<String>, via: Option<String>) -> Self {
        Self {
            forwarded_for,
            forwarded_host: None,
            via,
        }
    }

    pub fn with_forwarded_host(mut self, header: Option<String>) -> Self {
        self.forwarded_host = header;
        self
    }

    /// Filter `headers` for the given leg.
    ///
    /// `origin` only matters on the request leg. A missing client address is
    /// recorded as `unknown` so the address chain stays aligned.
    pub fn filter(&self, headers: &Headers, hop: Hop, origin: &Origin) -> Headers {
        let named_by_connection = connection_tokens(headers);
        let mut out = headers.clone();
        out.retain(|name, _| {
            let lower = name.to_ascii_lowercase();
            if is_hop_by_hop(&lower) || named_by_connection.contains(&lower) {
                return false;
            }
            // Host is recomputed per hop by the connector.
            !(hop == Hop::Request && lower == "host")
        });

        match hop {
            Hop::Request => {
                if let Some(header) = &self.forwarded_for {
                    let client = origin
                        .client
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
                    out.extend_list(header, &client);
                }
                if let (Some(header), Some(host)) = (&self.forwarded_host, &origin.host) {
                    out.extend_list(header, host);
                }
            }
            Hop::Response => {
                if let Some(via) = &self.via {
                    out.extend_list("Via", &format!("1.1 {via}"));
                }
            }
        }
        out
    }
}

/// Lowercased header names listed in any `Connection` header.
fn connection_tokens(headers: &Headers) -> HashSet<String> {
    headers
        .get_all("connection")
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}
