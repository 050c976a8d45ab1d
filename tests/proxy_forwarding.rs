//! Forwarding behaviour of `Proxy::act` against live upstreams.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::Router;
use futures_util::StreamExt;
use hyper::body::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Notify};

use upstream_relay::proxy::{
    ErrorKind, HeaderFilter, Headers, Proxy, RequestView, Timeouts, UpstreamTarget,
};

mod common;

const VERBS: [(Method, &str); 5] = [
    (Method::POST, "hello, post!"),
    (Method::GET, "hello, get!"),
    (Method::PUT, "hello, put!"),
    (Method::DELETE, "hello, delete!"),
    (Method::TRACE, "hello, trace!"),
];

#[tokio::test]
async fn each_verb_relays_upstream_body() {
    let upstream = common::start_greeting_upstream().await;
    let proxy = common::proxy_for(upstream);

    for (method, expected) in VERBS {
        let body = if method == Method::POST || method == Method::PUT {
            Body::from("payload")
        } else {
            Body::empty()
        };
        let view = proxy
            .act(common::request(method.clone(), "/", body))
            .await
            .unwrap();
        assert_eq!(view.status(), StatusCode::OK, "{method}");
        assert_eq!(common::body_string(view.into_body()).await, expected);
    }
}

#[tokio::test]
async fn correctly_maps_path_string() {
    let upstream = common::start_href_upstream().await;
    let proxy = common::proxy_for(upstream);

    for (method, _) in VERBS {
        let view = proxy
            .act(common::request(method.clone(), "/a/b/c", Body::empty()))
            .await
            .unwrap();
        assert_eq!(
            common::body_string(view.into_body()).await,
            format!("http://{}:{}/a/b/c", upstream.ip(), upstream.port()),
            "{method}"
        );
    }
}

#[tokio::test]
async fn prefix_and_query_are_mapped() {
    let upstream = common::start_href_upstream().await;
    let proxy = Proxy::new(UpstreamTarget::parse(&format!("http://{upstream}/base/")).unwrap());

    let view = proxy
        .act(common::request(Method::GET, "/s?q=a%20b&x=1&x=2", Body::empty()))
        .await
        .unwrap();
    assert_eq!(
        common::body_string(view.into_body()).await,
        format!("http://{upstream}/base/s?q=a%20b&x=1&x=2")
    );

    let view = proxy
        .act(common::request(Method::GET, "/s", Body::empty()))
        .await
        .unwrap();
    let href = common::body_string(view.into_body()).await;
    assert_eq!(href, format!("http://{upstream}/base/s"));
    assert!(!href.contains('?'));
}

#[tokio::test]
async fn hop_by_hop_headers_are_not_forwarded() {
    let upstream = common::start_header_echo_upstream().await;
    let proxy = common::proxy_for(upstream);

    let mut headers = Headers::new();
    for (name, value) in [
        ("X-First", "1"),
        ("Connection", "X-Private"),
        ("Keep-Alive", "timeout=5"),
        ("Content-Type", "Text/Plain; Charset=UTF-8"),
        ("Proxy-Authorization", "Basic c2VjcmV0"),
        ("X-Private", "not for upstream"),
        ("Upgrade", "h2c"),
        ("X-Second", "Mixed-Case Value"),
    ] {
        headers.append(name, HeaderValue::from_static(value));
    }
    let request = RequestView::new(Method::GET, Uri::from_static("/"), headers, Body::empty());

    let echoed = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    let lines: Vec<&str> = echoed.lines().collect();

    for banned in ["keep-alive:", "proxy-authorization:", "x-private:", "upgrade:"] {
        assert!(
            !lines.iter().any(|l| l.starts_with(banned)),
            "{banned} leaked upstream: {echoed}"
        );
    }

    let position = |line: &str| lines.iter().position(|l| *l == line);
    let first = position("x-first: 1").expect("x-first forwarded");
    let content_type =
        position("content-type: Text/Plain; Charset=UTF-8").expect("content-type forwarded");
    let second = position("x-second: Mixed-Case Value").expect("x-second forwarded");
    assert!(first < content_type && content_type < second, "order changed: {echoed}");
}

#[tokio::test]
async fn interleaved_duplicates_keep_per_name_order() {
    let upstream = common::start_header_echo_upstream().await;
    let proxy = common::proxy_for(upstream);

    let mut headers = Headers::new();
    for (name, value) in [("X-A", "1"), ("X-B", "2"), ("X-A", "3")] {
        headers.append(name, HeaderValue::from_static(value));
    }
    let request = RequestView::new(Method::GET, Uri::from_static("/"), headers, Body::empty());

    let echoed = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    let sent: Vec<&str> = echoed
        .lines()
        .filter(|l| l.starts_with("x-a:") || l.starts_with("x-b:"))
        .collect();
    // Values of one name never swap; names keep their first-occurrence order.
    assert_eq!(sent, vec!["x-a: 1", "x-a: 3", "x-b: 2"]);
}

#[tokio::test]
async fn forwarding_context_names_client_and_host() {
    let upstream = common::start_header_echo_upstream().await;
    let proxy = common::proxy_for(upstream);

    let mut headers = Headers::new();
    headers.append("Host", HeaderValue::from_static("relay.example"));
    let request = RequestView::new(Method::GET, Uri::from_static("/"), headers, Body::empty())
        .with_peer("203.0.113.7:5000".parse().unwrap());

    let echoed = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    assert!(echoed.lines().any(|l| l == "x-forwarded-for: 203.0.113.7"), "{echoed}");
    assert!(echoed.lines().any(|l| l == "x-forwarded-host: relay.example"), "{echoed}");
    assert!(echoed.lines().any(|l| l == format!("host: {upstream}")), "{echoed}");
}

#[tokio::test]
async fn existing_forwarded_for_is_extended() {
    let upstream = common::start_header_echo_upstream().await;
    let proxy = common::proxy_for(upstream);

    let mut headers = Headers::new();
    headers.append("X-Forwarded-For", HeaderValue::from_static("198.51.100.1"));
    let request = RequestView::new(Method::GET, Uri::from_static("/"), headers, Body::empty())
        .with_peer("203.0.113.7:5000".parse().unwrap());

    let echoed = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    assert!(
        echoed.lines().any(|l| l == "x-forwarded-for: 198.51.100.1, 203.0.113.7"),
        "{echoed}"
    );
}

#[tokio::test]
async fn forwarding_context_can_be_disabled() {
    let upstream = common::start_header_echo_upstream().await;
    let proxy = Proxy::with_options(
        UpstreamTarget::parse(&format!("http://{upstream}")).unwrap(),
        HeaderFilter::new(None, None),
        Timeouts::default(),
    );

    let mut headers = Headers::new();
    headers.append("Host", HeaderValue::from_static("front.example"));
    let request = RequestView::new(Method::GET, Uri::from_static("/"), headers, Body::empty());

    let echoed = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    assert!(!echoed.contains("x-forwarded-for"), "{echoed}");
    assert!(!echoed.contains("x-forwarded-host"), "{echoed}");
}

#[tokio::test]
async fn known_length_body_keeps_content_length() {
    let upstream = common::start_upstream(Router::new().fallback(
        |headers: axum::http::HeaderMap, body: Bytes| async move {
            let length = headers
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            let chunked = headers.contains_key("transfer-encoding");
            format!("{length} {chunked} {}", String::from_utf8_lossy(&body))
        },
    ))
    .await;
    let proxy = common::proxy_for(upstream);

    let mut headers = Headers::new();
    headers.append("Content-Length", HeaderValue::from_static("7"));
    let request = RequestView::new(Method::PUT, Uri::from_static("/"), headers, Body::from("payload"));

    let reply = common::body_string(proxy.act(request).await.unwrap().into_body()).await;
    assert_eq!(reply, "7 false payload");
}

#[tokio::test]
async fn request_body_is_streamed_not_buffered() {
    const CHUNK: usize = 64 * 1024;
    const CHUNKS: usize = 64;

    let first_chunk_seen = Arc::new(Notify::new());
    let seen = first_chunk_seen.clone();
    let upstream = common::start_upstream(Router::new().fallback(move |body: Body| {
        let seen = seen.clone();
        async move {
            let mut stream = body.into_data_stream();
            let mut total = 0usize;
            while let Some(chunk) = stream.next().await {
                total += chunk.unwrap().len();
                seen.notify_one();
            }
            total.to_string()
        }
    }))
    .await;

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let request = common::request(Method::POST, "/upload", Body::from_stream(stream));

    // The rest of the body is only produced once the upstream has received
    // the first chunk, which cannot happen if the proxy buffers the body.
    let producer = tokio::spawn(async move {
        tx.send(Ok(Bytes::from(vec![b'x'; CHUNK]))).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), first_chunk_seen.notified())
            .await
            .expect("upstream saw nothing before the body was complete");
        for _ in 1..CHUNKS {
            tx.send(Ok(Bytes::from(vec![b'x'; CHUNK]))).await.unwrap();
        }
    });

    let view = common::proxy_for(upstream).act(request).await.unwrap();
    producer.await.unwrap();
    assert_eq!(
        common::body_string(view.into_body()).await,
        (CHUNK * CHUNKS).to_string()
    );
}

#[tokio::test]
async fn response_body_is_streamed_before_upstream_finishes() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let upstream = common::start_upstream(Router::new().fallback(move || {
        let gate = gate.clone();
        async move {
            let stream = futures_util::stream::unfold(0u8, move |step| {
                let gate = gate.clone();
                async move {
                    match step {
                        0 => Some((Ok::<_, std::io::Error>(Bytes::from_static(b"first")), 1)),
                        1 => {
                            gate.notified().await;
                            Some((Ok(Bytes::from_static(b"second")), 2))
                        }
                        _ => None,
                    }
                }
            });
            Body::from_stream(stream)
        }
    }))
    .await;

    let view = common::proxy_for(upstream)
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap();
    let mut body = view.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("first chunk should arrive while upstream is still open")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"first");

    release.notify_one();
    let mut rest = Vec::new();
    while let Some(chunk) = body.next().await {
        rest.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(rest, b"second");
}

#[tokio::test]
async fn repeated_get_yields_identical_views() {
    let upstream = common::start_href_upstream().await;
    let proxy = common::proxy_for(upstream);

    let mut seen = Vec::new();
    for _ in 0..2 {
        let view = proxy
            .act(common::request(Method::GET, "/same?x=1", Body::empty()))
            .await
            .unwrap();
        let status = view.status();
        let headers: Vec<(String, String)> = view
            .headers()
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("date"))
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap().to_string()))
            .collect();
        let body = common::body_string(view.into_body()).await;
        seen.push((status, headers, body));
    }
    assert_eq!(seen[0], seen[1]);
}

#[tokio::test]
async fn status_reason_and_response_headers_are_relayed() {
    let upstream = common::start_raw_upstream(
        b"HTTP/1.1 299 Custom Thing\r\nKeep-Alive: timeout=5\r\nX-Kept: yes\r\nContent-Length: 2\r\n\r\nok",
        Duration::from_millis(50),
    )
    .await;

    let view = common::proxy_for(upstream)
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(view.status().as_u16(), 299);
    assert_eq!(view.reason(), "Custom Thing");
    assert_eq!(view.headers().get("x-kept").unwrap(), "yes");
    assert_eq!(view.headers().get("content-length").unwrap(), "2");
    assert!(!view.headers().contains("keep-alive"));
    assert_eq!(common::body_string(view.into_body()).await, "ok");
}

#[tokio::test]
async fn unreachable_upstream_is_connection_error() {
    let proxy = common::proxy_for(common::closed_port().await);
    let err = proxy
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn malformed_status_line_is_protocol_error() {
    let upstream = common::start_raw_upstream(b"HTTP/1.1 abc\r\n\r\n", Duration::from_millis(50)).await;
    let err = common::proxy_for(upstream)
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn silent_upstream_is_timeout() {
    let upstream = common::start_raw_upstream(b"", Duration::from_secs(5)).await;
    let proxy = Proxy::with_options(
        UpstreamTarget::parse(&format!("http://{upstream}")).unwrap(),
        HeaderFilter::default(),
        Timeouts {
            response_head: Duration::from_millis(200),
            ..Timeouts::default()
        },
    );

    let err = proxy
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn relative_target_is_mapping_error() {
    let proxy = common::proxy_for(common::closed_port().await);
    let request = RequestView::new(Method::OPTIONS, Uri::from_static("*"), Headers::new(), Body::empty());
    let err = proxy.act(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
}

#[tokio::test]
async fn truncated_body_ends_stream_with_error() {
    let upstream = common::start_raw_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly ten b",
        Duration::ZERO,
    )
    .await;

    let view = common::proxy_for(upstream)
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(view.status(), StatusCode::OK);
    assert!(axum::body::to_bytes(view.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn stalled_body_hits_idle_timeout() {
    let upstream = common::start_raw_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial",
        Duration::from_secs(10),
    )
    .await;
    let proxy = Proxy::with_options(
        UpstreamTarget::parse(&format!("http://{upstream}")).unwrap(),
        HeaderFilter::default(),
        Timeouts {
            body_idle: Duration::from_millis(200),
            ..Timeouts::default()
        },
    );

    let view = proxy
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap();
    let drained = tokio::time::timeout(
        Duration::from_secs(3),
        axum::body::to_bytes(view.into_body(), usize::MAX),
    )
    .await
    .expect("idle timeout should end the body");
    assert!(drained.is_err());
}

#[tokio::test]
async fn dropping_response_closes_upstream_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        common::read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nstart")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let closed = matches!(socket.read(&mut buf).await, Ok(0) | Err(_));
        let _ = closed_tx.send(closed);
    });

    let view = common::proxy_for(upstream)
        .act(common::request(Method::GET, "/", Body::empty()))
        .await
        .unwrap();
    drop(view);

    let closed = tokio::time::timeout(Duration::from_secs(2), closed_rx)
        .await
        .expect("upstream connection should be released")
        .unwrap();
    assert!(closed);
}
