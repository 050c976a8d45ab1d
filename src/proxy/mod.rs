//! Forwarding core.
//!
//! # Data Flow
//! ```text
//! RequestView (from dispatch)
//!     → target.rs (base prefix + inbound path, query verbatim)
//!     → headers.rs (drop hop-by-hop, add forwarding context)
//!     → connector.rs (resolve, connect, write head + streamed body,
//!                     read status line + headers)
//!     → relay.rs (status, filtered headers, lazy body)
//!     → ResponseView (back to dispatch)
//! ```
//!
//! # Design Decisions
//! - No state survives a call; the only shared value is the immutable
//!   `UpstreamTarget` behind an `Arc`
//! - Bodies are pulled through in both directions, never buffered whole
//! - Exactly one attempt per call; failures are classified, not retried

pub mod connector;
pub mod error;
pub mod exchange;
pub mod headers;
pub mod orchestrator;
pub mod relay;
pub mod request;
pub mod take;
pub mod target;
mod upload;

pub use connector::{MappedRequest, Timeouts, UpstreamConnector};
pub use error::{ErrorKind, ProxyError, StreamingFailure, TimeoutPhase};
pub use exchange::{Exchange, ExchangeState};
pub use headers::{HeaderFilter, Headers, Hop, Origin};
pub use orchestrator::Proxy;
pub use relay::{ResponseRelay, ResponseView};
pub use request::RequestView;
pub use take::{FixedTake, Take};
pub use target::{TargetError, UpstreamTarget};
