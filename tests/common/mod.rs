//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Uri},
    Router,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use upstream_relay::proxy::{Headers, Proxy, RequestView, UpstreamTarget};
use upstream_relay::{HttpServer, Shutdown};

/// Serve `router` on an ephemeral local port.
pub async fn start_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Upstream answering `hello, <method>!` for every path.
pub async fn start_greeting_upstream() -> SocketAddr {
    start_upstream(Router::new().fallback(|method: Method| async move {
        format!("hello, {}!", method.as_str().to_lowercase())
    }))
    .await
}

/// Upstream answering with the absolute href it saw: `http://<Host><path?query>`.
pub async fn start_href_upstream() -> SocketAddr {
    start_upstream(Router::new().fallback(|headers: HeaderMap, uri: Uri| async move {
        let host = headers
            .get("host")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        format!("http://{}{}", host, uri)
    }))
    .await
}

/// Upstream answering with its request headers, one `name: value` per line.
pub async fn start_header_echo_upstream() -> SocketAddr {
    start_upstream(Router::new().fallback(|headers: HeaderMap| async move {
        headers
            .iter()
            .map(|(n, v)| format!("{}: {}", n, v.to_str().unwrap_or("<binary>")))
            .collect::<Vec<_>>()
            .join("\n")
    }))
    .await
}

/// Raw TCP upstream: reads the request head, writes `response` verbatim,
/// then keeps the socket open for `linger`.
pub async fn start_raw_upstream(response: &'static [u8], linger: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(response).await;
                tokio::time::sleep(linger).await;
            });
        }
    });
    addr
}

/// Read until the end of an HTTP request head.
pub async fn read_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn proxy_for(upstream: SocketAddr) -> Proxy {
    Proxy::new(UpstreamTarget::parse(&format!("http://{}", upstream)).unwrap())
}

pub fn request(method: Method, uri: &str, body: Body) -> RequestView {
    RequestView::new(method, uri.parse().unwrap(), Headers::new(), body)
}

/// Run the relay in front of `proxy` on an ephemeral port.
pub async fn start_relay(proxy: Proxy) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = HttpServer::new(proxy).run(listener, signal).await;
    });
    (addr, shutdown)
}

pub async fn body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
