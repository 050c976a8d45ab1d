//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router sending every path and method to one take
//! - Wire up middleware (tracing, request ID)
//! - Project inbound requests into `RequestView`s
//! - Serialize `ResponseView`s or translate failures into gateway statuses
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::response::error_response;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::{RequestView, Take};

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// HTTP front end dispatching every request to a single take.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server that hands every request to `take`.
    pub fn new<T: Take>(take: T) -> Self {
        Self {
            router: Self::build_router(Arc::new(take)),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router<T: Take>(take: Arc<T>) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/", any(take_handler::<T>))
            .route("/{*path}", any(take_handler::<T>))
            .with_state(take)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id)),
            )
    }

    /// The router, for driving the server in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.recv())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Hand the request to the take and serialize whatever comes back.
async fn take_handler<T: Take>(State(take): State<Arc<T>>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut view = RequestView::from_http(request);
    if let Some(peer) = peer {
        view = view.with_peer(peer);
    }

    match take.act(view).await {
        Ok(response) => response.into_response(),
        Err(e) => error_response(&e),
    }
}
