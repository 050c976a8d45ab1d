//! Per-call exchange record and its state machine.
//!
//! ```text
//! Start ──▶ Mapped ──▶ Forwarding ──▶ Relayed
//!   │          │            │
//!   └──────────┴────────────┴──▶ Failed(kind)
//! ```
//!
//! One `Exchange` lives for exactly one `act` call and is never shared.

use std::time::Instant;

use axum::http::{Method, StatusCode, Uri};

use crate::observability::metrics;
use crate::proxy::error::{ErrorKind, ProxyError};

/// Where a forwarding call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Start,
    Mapped,
    Forwarding,
    Relayed(StatusCode),
    Failed(ErrorKind),
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeState::Relayed(_) | ExchangeState::Failed(_))
    }
}

/// Bookkeeping for a single forwarding call.
#[derive(Debug)]
pub struct Exchange {
    state: ExchangeState,
    method: Method,
    path: String,
    started: Instant,
}

impl Exchange {
    pub fn start(method: &Method, path: &str) -> Self {
        tracing::debug!(method = %method, path = %path, "Proxying request");
        Self {
            state: ExchangeState::Start,
            method: method.clone(),
            path: path.to_string(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn mapped(&mut self, uri: &Uri) {
        self.transition(ExchangeState::Start, ExchangeState::Mapped);
        tracing::debug!(method = %self.method, path = %self.path, upstream = %uri, "Request mapped");
    }

    pub fn forwarding(&mut self) {
        self.transition(ExchangeState::Mapped, ExchangeState::Forwarding);
    }

    pub fn relayed(&mut self, status: StatusCode) {
        self.transition(ExchangeState::Forwarding, ExchangeState::Relayed(status));
        tracing::debug!(
            method = %self.method,
            path = %self.path,
            status = status.as_u16(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Upstream response relayed"
        );
        metrics::record_request(self.method.as_str(), status.as_u16(), self.started);
    }

    /// Move to `Failed`, record it, and hand the error back for propagation.
    pub fn fail(&mut self, err: ProxyError) -> ProxyError {
        debug_assert!(!self.state.is_terminal(), "exchange already finished");
        let kind = err.kind();
        self.state = ExchangeState::Failed(kind);

        if kind.is_client_side() {
            tracing::info!(method = %self.method, path = %self.path, kind = %kind, error = %err, "Request rejected");
        } else {
            tracing::warn!(method = %self.method, path = %self.path, kind = %kind, error = %err, "Upstream request failed");
        }
        metrics::record_failure(kind, self.started);
        err
    }

    fn transition(&mut self, from: ExchangeState, to: ExchangeState) {
        debug_assert_eq!(self.state, from, "invalid exchange transition to {to:?}");
        self.state = to;
    }
}
