//! End-to-end tests: real listeners, real clients and local upstream servers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use multi_proxy::config::{Credentials, ListenerConfig};
use multi_proxy::{ListenerSet, ProtocolKind, ProxyConfig, ProxyError, ProxyHandle, ProxyService, StandardProxyService};

/// A running proxy with its bound addresses
struct TestProxy {
    handle: ProxyHandle,
    socks4: SocketAddr,
    socks5: SocketAddr,
    http: SocketAddr,
}

async fn start_proxy(socks5_auth: Option<Credentials>) -> TestProxy {
    let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let config = ProxyConfig {
        listeners: vec![
            ListenerConfig::new(ProtocolKind::Socks4, any_port),
            ListenerConfig::new(ProtocolKind::Socks5, any_port),
            ListenerConfig::new(ProtocolKind::Http, any_port),
        ],
        connect_timeout: 5,
        shutdown_timeout: 2,
        socks5_auth,
        ..Default::default()
    };
    let config = Arc::new(config);
    let listeners = ListenerSet::bind(&config).unwrap();

    let socks4 = listeners.local_addr(ProtocolKind::Socks4).unwrap();
    let socks5 = listeners.local_addr(ProtocolKind::Socks5).unwrap();
    let http = listeners.local_addr(ProtocolKind::Http).unwrap();
    let handle = StandardProxyService::new(listeners, config).start().unwrap();

    TestProxy { handle, socks4, socks5, http }
}

/// Echo server accepting any number of connections
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// HTTP server that answers 200 with the request head it received as body
async fn start_http_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    head.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(&head).await;
            });
        }
    });
    addr
}

/// An address nothing listens on
fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn v4_parts(addr: SocketAddr) -> ([u8; 4], [u8; 2]) {
    match addr {
        SocketAddr::V4(v4) => (v4.ip().octets(), v4.port().to_be_bytes()),
        SocketAddr::V6(_) => panic!("test servers bind IPv4"),
    }
}

async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
    match read {
        Ok(Ok(_)) => assert!(rest.is_empty(), "unexpected bytes after failure reply: {:?}", rest),
        // A reset also means the proxy closed the connection
        Ok(Err(_)) => {}
        Err(_) => panic!("proxy kept the connection open"),
    }
}

async fn socks4_connect(proxy: SocketAddr, target: SocketAddr) -> (TcpStream, [u8; 8]) {
    let (ip, port) = v4_parts(target);
    let mut stream = TcpStream::connect(proxy).await.unwrap();

    let mut request = vec![0x04, 0x01];
    request.extend_from_slice(&port);
    request.extend_from_slice(&ip);
    request.extend_from_slice(b"tester\0");
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.unwrap();
    (stream, reply)
}

/// Send a SOCKS5 CONNECT after the greeting; returns the reply code
async fn socks5_request(stream: &mut TcpStream, address: &[u8]) -> u8 {
    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(address);
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);

    let bound_len = match reply[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        other => panic!("unexpected bound address type {}", other),
    };
    let mut bound = vec![0u8; bound_len];
    stream.read_exact(&mut bound).await.unwrap();
    reply[1]
}

fn socks5_ipv4(target: SocketAddr) -> Vec<u8> {
    let (ip, port) = v4_parts(target);
    let mut address = vec![0x01];
    address.extend_from_slice(&ip);
    address.extend_from_slice(&port);
    address
}

async fn socks5_no_auth(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);
    stream
}

async fn wait_for_idle(handle: &ProxyHandle) -> usize {
    let mut active = usize::MAX;
    for _ in 0..100 {
        active = handle.active_connections().await.unwrap();
        if active == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    active
}

#[tokio::test]
async fn test_socks4_passthrough() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let (mut stream, reply) = socks4_connect(proxy.socks4, echo).await;
    assert_eq!(reply[0], 0x00);
    assert_eq!(reply[1], 0x5A);

    assert_echo(&mut stream, b"hello through socks4").await;
    drop(stream);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_socks4a_domain_passthrough() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let mut stream = TcpStream::connect(proxy.socks4).await.unwrap();
    let mut request = vec![0x04, 0x01];
    request.extend_from_slice(&echo.port().to_be_bytes());
    request.extend_from_slice(&[0, 0, 0, 1]);
    request.push(0);
    request.extend_from_slice(b"localhost\0");
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x5A);

    assert_echo(&mut stream, b"hello through socks4a").await;
    drop(stream);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_socks5_passthrough() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    // IPv4 target
    let mut stream = socks5_no_auth(proxy.socks5).await;
    assert_eq!(socks5_request(&mut stream, &socks5_ipv4(echo)).await, 0x00);
    assert_echo(&mut stream, b"hello through socks5").await;
    drop(stream);

    // Domain target
    let mut stream = socks5_no_auth(proxy.socks5).await;
    let mut address = vec![0x03, b"localhost".len() as u8];
    address.extend_from_slice(b"localhost");
    address.extend_from_slice(&echo.port().to_be_bytes());
    assert_eq!(socks5_request(&mut stream, &address).await, 0x00);
    assert_echo(&mut stream, b"hello via domain").await;
    drop(stream);

    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_socks5_username_password() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(Some(Credentials {
        username: "alice".to_string(),
        password: "secret".to_string(),
    }))
    .await;

    let auth = |user: &str, pass: &str| {
        let mut msg = vec![0x01, user.len() as u8];
        msg.extend_from_slice(user.as_bytes());
        msg.push(pass.len() as u8);
        msg.extend_from_slice(pass.as_bytes());
        msg
    };

    // Accepted
    let mut stream = TcpStream::connect(proxy.socks5).await.unwrap();
    stream.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x02]);
    stream.write_all(&auth("alice", "secret")).await.unwrap();
    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0x00]);
    assert_eq!(socks5_request(&mut stream, &socks5_ipv4(echo)).await, 0x00);
    assert_echo(&mut stream, b"authenticated").await;
    drop(stream);

    // Wrong password
    let mut stream = TcpStream::connect(proxy.socks5).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x02]);
    stream.write_all(&auth("alice", "wrong")).await.unwrap();
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0x01]);
    assert_closed(&mut stream).await;

    // No-auth offered only
    let mut stream = TcpStream::connect(proxy.socks5).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0xFF]);
    assert_closed(&mut stream).await;

    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_connect_passthrough() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", echo, echo);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut reply = vec![0u8; b"HTTP/1.1 200 Connection Established\r\n\r\n".len()];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, b"HTTP/1.1 200 Connection Established\r\n\r\n");

    assert_echo(&mut stream, b"hello through connect").await;
    drop(stream);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_forward_adds_marker_header() {
    let upstream = start_http_server().await;
    let proxy = start_proxy(None).await;

    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!(
        "GET http://{}/get?x=1 HTTP/1.1\r\nHost: {}\r\nProxy-Connection: keep-alive\r\n\r\n",
        upstream, upstream
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got {}", response);
    // The body is the head the upstream received
    assert!(response.contains("GET /get?x=1 HTTP/1.1\r\n"));
    assert!(response.contains("X-Proxy: http\r\n"));
    assert!(!response.to_ascii_lowercase().contains("proxy-connection"));
    drop(stream);

    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_forward_after_client_half_close() {
    let upstream = start_http_server().await;
    let proxy = start_proxy(None).await;

    // Like `printf ... | nc -N`: send the request, then close the write side
    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!("GET http://{}/ HTTP/1.0\r\n\r\n", upstream);
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got {:?}", response);
    assert!(response.contains("GET / HTTP/1.0\r\n"));

    drop(stream);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_connect_with_early_data_after_half_close() {
    let target = start_echo_server().await;
    let proxy = start_proxy(None).await;

    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\n\r\nping", target);
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got {:?}", response);
    assert!(response.ends_with("\r\n\r\nping"), "got {:?}", response);

    drop(stream);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_target_replies_and_closes() {
    let target = closed_port();
    let proxy = start_proxy(None).await;

    let (mut stream, reply) = socks4_connect(proxy.socks4, target).await;
    assert_eq!(reply[1], 0x5B);
    assert_closed(&mut stream).await;

    let mut stream = socks5_no_auth(proxy.socks5).await;
    let rep = socks5_request(&mut stream, &socks5_ipv4(target)).await;
    assert_ne!(rep, 0x00);
    assert_closed(&mut stream).await;

    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", target);
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 5"), "got {}", response);

    assert_eq!(wait_for_idle(&proxy.handle).await, 0);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_forward_failures_reply_and_close() {
    let target = closed_port();
    let proxy = start_proxy(None).await;

    // Upstream refuses the connection
    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    let request = format!("GET http://{}/ HTTP/1.1\r\nHost: {}\r\n\r\n", target, target);
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 502"), "got {:?}", response);

    // Only plain http can be forwarded
    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    stream
        .write_all(b"GET https://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 400"), "got {:?}", response);

    assert_eq!(wait_for_idle(&proxy.handle).await, 0);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_protocol_is_rejected() {
    let proxy = start_proxy(None).await;

    // SOCKS5 version byte sent to the SOCKS4 listener
    let mut stream = TcpStream::connect(proxy.socks4).await.unwrap();
    stream.write_all(&[0x05]).await.unwrap();
    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x5B);
    assert_closed(&mut stream).await;

    // Garbage sent to the HTTP listener
    let mut stream = TcpStream::connect(proxy.http).await.unwrap();
    stream.write_all(b"\x00\x01\x02 nonsense\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1 400"));

    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_leaving_early_leaks_nothing() {
    let proxy = start_proxy(None).await;

    // Half a handshake, then gone
    let mut stream = TcpStream::connect(proxy.socks5).await.unwrap();
    stream.write_all(&[0x05, 0x01]).await.unwrap();
    drop(stream);

    // Full request towards a target that never answers, then gone
    let mut stream = socks5_no_auth(proxy.socks5).await;
    stream
        .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 255, 255, 1, 0, 9])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);

    assert_eq!(wait_for_idle(&proxy.handle).await, 0);
    proxy.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_conflict_fails_startup() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let config = ProxyConfig {
        listeners: vec![
            ListenerConfig::new(ProtocolKind::Socks4, "127.0.0.1:0".parse().unwrap()),
            ListenerConfig::new(ProtocolKind::Socks5, addr),
        ],
        ..Default::default()
    };

    match ListenerSet::bind(&config) {
        Err(ProxyError::Bind { protocol, addr: failed, .. }) => {
            assert_eq!(protocol, ProtocolKind::Socks5);
            assert_eq!(failed, addr);
        }
        other => panic!("expected a bind error, got {:?}", other.map(|set| set.len())),
    }
}

#[tokio::test]
async fn test_shutdown_closes_listeners() {
    let proxy = start_proxy(None).await;
    proxy.handle.shutdown().await.unwrap();

    for addr in [proxy.socks4, proxy.socks5, proxy.http] {
        assert!(TcpStream::connect(addr).await.is_err());
    }
    assert!(proxy.handle.active_connections().await.is_err());
}
