//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → RequestView
//!     → Take::act (the proxy, or any other take)
//!     → ResponseView, or response.rs (failure → gateway status)
//!     → Send to client
//! ```

pub mod response;
pub mod server;

pub use response::{error_response, status_for};
pub use server::{HttpServer, X_REQUEST_ID};
