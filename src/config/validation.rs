//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, the upstream URI and timeout ranges
//! - Validate the names and tokens of headers the relay synthesizes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::proxy::target::{TargetError, UpstreamTarget};

/// A single semantic problem in the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("upstream.base_uri: {0}")]
    Upstream(#[from] TargetError),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("forwarding.{field} {value:?} is not a valid header name")]
    ForwardingHeader { field: &'static str, value: String },

    #[error("forwarding.via {0:?} must be a single token or host[:port]")]
    Via(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check `config` and collect every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if let Err(e) = UpstreamTarget::parse(&config.upstream.base_uri) {
        errors.push(e.into());
    }

    let timeouts = [
        ("connect_secs", config.timeouts.connect_secs),
        ("response_secs", config.timeouts.response_secs),
        ("body_idle_secs", config.timeouts.body_idle_secs),
    ];
    for (name, secs) in timeouts {
        if secs == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.forwarding.enabled {
        let names = [
            ("header", &config.forwarding.header),
            ("host_header", &config.forwarding.host_header),
        ];
        for (field, value) in names {
            if HeaderName::from_bytes(value.as_bytes()).is_err() {
                errors.push(ValidationError::ForwardingHeader {
                    field,
                    value: value.clone(),
                });
            }
        }
    }

    if let Some(via) = &config.forwarding.via {
        if !is_via_pseudonym(via) {
            errors.push(ValidationError::Via(via.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `received-by` of a `Via` entry: a token or `host[:port]`, no list syntax.
fn is_via_pseudonym(via: &str) -> bool {
    !via.is_empty()
        && via.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~:[]".contains(&b)
        })
}
