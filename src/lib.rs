//! Transparent single-upstream HTTP relay.
//!
//! Accepts a request, maps it onto one configured upstream, forwards it and
//! streams the upstream's response back, preserving method, path, query,
//! end-to-end headers and bodies across the hop.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{Proxy, ProxyError, RequestView, ResponseView, Take, UpstreamTarget};
