//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! proxy/exchange.rs, proxy/relay.rs, http/server.rs
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every failure is logged with its `kind` field
//! - x-request-id flows through the HTTP layer's trace spans
//! - Metrics are cheap and no-ops without an installed recorder

pub mod logging;
pub mod metrics;
