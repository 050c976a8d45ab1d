//! A fixed-response upstream to point the relay at.
//!
//! Answers `hello, <method>!` for every path, e.g. `hello, post!`.
//!
//! ```text
//! cargo run --example mock_backend
//! cargo run -- --upstream http://127.0.0.1:8081
//! ```

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode};
use tokio::net::TcpListener;

use upstream_relay::lifecycle::{shutdown_on_signal, Shutdown};
use upstream_relay::proxy::{Headers, ProxyError, RequestView, ResponseView, Take};
use upstream_relay::HttpServer;

struct Greeter;

impl Take for Greeter {
    async fn act(&self, request: RequestView) -> Result<ResponseView, ProxyError> {
        let mut headers = Headers::new();
        headers.append("Content-Type", HeaderValue::from_static("text/plain"));
        let body = format!("hello, {}!", request.method().as_str().to_lowercase());
        Ok(ResponseView::new(StatusCode::OK, headers, Body::from(body)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = SocketAddr::from(([127, 0, 0, 1], 8081));
    let listener = TcpListener::bind(addr).await?;
    println!("Mock upstream listening on http://{}", addr);

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));
    HttpServer::new(Greeter).run(listener, shutdown.subscribe()).await?;
    Ok(())
}
