//! End-to-end tests over real sockets with the hyper transport.

use poolnet::base::error::HTTP_ONLY_PROXY_HINT;
use poolnet::{
    ConnError, HttpConnector, PoolBuilder, PoolError, ProxySettings, RequestOptions, Retry, Timeout,
};
use http::Method;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Read one request head off `socket`.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).to_string()
}

/// Serve `replies` in order on a single keep-alive connection; returns the request heads.
async fn serve(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut heads = Vec::new();
        for reply in replies {
            heads.push(read_head(&mut socket).await);
            socket.write_all(reply.as_bytes()).await.unwrap();
        }
        heads
    });
    (port, handle)
}

#[tokio::test]
async fn test_get_over_tcp() {
    let (port, server) = serve(vec!["HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"]).await;
    let pool = PoolBuilder::http("127.0.0.1").port(port).build(HttpConnector);

    let response = pool.urlopen(Method::GET, "/greeting?lang=en", RequestOptions::default()).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    let heads = server.await.unwrap();
    assert!(heads[0].starts_with("GET /greeting?lang=en HTTP/1.1\r\n"));
    assert!(heads[0].to_ascii_lowercase().contains(&format!("host: 127.0.0.1:{port}\r\n")));
}

#[tokio::test]
async fn test_keep_alive_connection_reused() {
    let (port, server) = serve(vec![
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none",
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo",
    ])
    .await;
    let pool = PoolBuilder::http("127.0.0.1").port(port).build(HttpConnector);

    let first = pool.urlopen(Method::GET, "/1", RequestOptions::default()).await.unwrap();
    assert_eq!(first.text().await.unwrap(), "one");
    let second = pool.urlopen(Method::GET, "/2", RequestOptions::default()).await.unwrap();
    assert_eq!(second.text().await.unwrap(), "two");

    assert_eq!(pool.num_connections(), 1);
    assert_eq!(pool.num_requests(), 2);
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_post_body_and_redirect() {
    let (port, server) = serve(vec![
        "HTTP/1.1 307 Temporary Redirect\r\nLocation: /final\r\nContent-Length: 0\r\n\r\n",
        "HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok",
    ])
    .await;
    let pool = PoolBuilder::http("127.0.0.1").port(port).build(HttpConnector);

    let response = pool
        .urlopen(Method::POST, "/start", RequestOptions::default().body("abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let heads = server.await.unwrap();
    assert!(heads[0].starts_with("POST /start HTTP/1.1\r\n"));
    assert!(heads[1].starts_with("POST /final HTTP/1.1\r\n"));
    assert!(heads[1].to_ascii_lowercase().contains("content-length: 3\r\n"));
}

#[tokio::test]
async fn test_read_timeout_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_head(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let pool = PoolBuilder::http("127.0.0.1")
        .port(port)
        .timeout(Timeout::new().with_read(Duration::from_millis(200)))
        .retries(Retry::disabled())
        .build(HttpConnector);

    let err = pool.urlopen(Method::GET, "/slow", RequestOptions::default()).await.unwrap_err();
    match err {
        PoolError::ReadTimeout { timeout, .. } => assert_eq!(timeout, Some(Duration::from_millis(200))),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let pool = PoolBuilder::http("127.0.0.1").port(port).retries(Retry::disabled()).build(HttpConnector);
    let err = pool.urlopen(Method::GET, "/", RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, PoolError::NewConnection { .. }));
    assert_eq!(pool.slots().available(), 1);
}

#[tokio::test]
async fn test_https_proxy_answering_plaintext() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n").await;
    });

    let proxy = ProxySettings::new(&format!("https://127.0.0.1:{port}")).unwrap();
    let pool = PoolBuilder::https("example.com").proxy(proxy).retries(Retry::disabled()).build(HttpConnector);

    let err = pool.urlopen(Method::GET, "/", RequestOptions::default()).await.unwrap_err();
    match &err {
        PoolError::Proxy { cause, .. } => assert_eq!(*cause, ConnError::ProxyTunnelRejected),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains(HTTP_ONLY_PROXY_HINT));
}

#[tokio::test]
async fn test_connect_tunnel_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await;
        socket.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        head
    });

    let proxy = ProxySettings::new(&format!("http://127.0.0.1:{port}")).unwrap();
    let pool = PoolBuilder::https("example.com").proxy(proxy).retries(Retry::new(0)).build(HttpConnector);

    let err = pool.urlopen(Method::GET, "/", RequestOptions::default()).await.unwrap_err();
    match err {
        PoolError::MaxRetry { reason, .. } => match *reason {
            PoolError::Proxy { cause, .. } => assert_eq!(cause, ConnError::Tunnel("403 Forbidden".into())),
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
    assert!(server.await.unwrap().starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_tls_failure_inside_open_tunnel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_head(&mut socket).await;
        socket.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await.unwrap();
        // Not a TLS server hello.
        let _ = socket.write_all(b"garbage\r\n\r\n").await;
    });

    let proxy = ProxySettings::new(&format!("http://127.0.0.1:{port}")).unwrap();
    let pool = PoolBuilder::https("example.com").proxy(proxy).retries(Retry::disabled()).build(HttpConnector);

    let err = pool.urlopen(Method::GET, "/", RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, PoolError::Ssl { .. }), "unexpected {err:?}");
}
