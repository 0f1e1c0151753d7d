//! HTTP proxy handshake
//!
//! `CONNECT host:port` opens a raw tunnel. Any other method is forwarded as
//! a plain request: the head is rewritten to origin-form and tagged with
//! `X-Proxy: http` before it goes upstream.

use bytes::{Buf, Bytes, BytesMut};
use http::{StatusCode, Uri};
use log::trace;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::address::TargetAddr;
use super::{ProtocolKind, ProxyRequest};
use crate::common::{HandshakeError, ProxyError, Result};

/// Largest request head accepted from a client
pub const MAX_HEAD_LEN: usize = 64 * 1024;
/// Most headers accepted in a request head
pub const MAX_HEADERS: usize = 100;

/// Marker header added to forwarded requests
pub const PROXY_MARKER_HEADER: &str = "X-Proxy";
/// Value of the marker header
pub const PROXY_MARKER_VALUE: &str = "http";

/// Reply sent once a CONNECT tunnel is ready
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Headers meant for the proxy itself, never forwarded
const PROXY_ONLY_HEADERS: [&str; 2] = ["proxy-connection", "proxy-authorization"];

/// Parsed request head, detached from the read buffer
#[derive(Debug, Clone)]
struct RequestHead {
    method: String,
    target: String,
    version: u8,
    headers: Vec<(String, Vec<u8>)>,
    len: usize,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// Read the request head and turn it into a proxy request
pub async fn negotiate<S>(stream: &mut S) -> Result<ProxyRequest>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HandshakeError::UnexpectedEof.into());
        }

        if let Some(head) = parse_head(&buf)? {
            buf.advance(head.len);
            return build_request(head, buf.freeze());
        }

        if buf.len() >= MAX_HEAD_LEN {
            return Err(HandshakeError::TooLarge.into());
        }
    }
}

/// Try to parse a complete head from the buffer
fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(HandshakeError::TooLarge.into()),
        Err(e) => return Err(HandshakeError::Malformed(e.to_string()).into()),
    };

    let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version) else {
        return Err(HandshakeError::Malformed("incomplete request line".to_string()).into());
    };

    Ok(Some(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version,
        headers: req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect(),
        len,
    }))
}

/// Build the proxy request; `rest` holds bytes read past the head
fn build_request(head: RequestHead, rest: Bytes) -> Result<ProxyRequest> {
    if head.method.eq_ignore_ascii_case("CONNECT") {
        let target = TargetAddr::parse_authority(&head.target, Some(443))?;
        trace!("CONNECT to {} with {} early bytes", target, rest.len());
        return Ok(ProxyRequest::tunnel(ProtocolKind::Http, target, None).with_initial_upstream(rest));
    }

    let (target, path) = forward_target(&head)?;
    let mut upstream = rewrite_head(&head, &target, &path);
    upstream.extend_from_slice(&rest);
    trace!("Forwarding {} {} to {}", head.method, path, target);

    Ok(ProxyRequest::forward(target, upstream.freeze()))
}

/// Work out where a plain request goes and its origin-form path
fn forward_target(head: &RequestHead) -> Result<(TargetAddr, String)> {
    let uri: Uri = head
        .target
        .parse()
        .map_err(|e: http::uri::InvalidUri| HandshakeError::Malformed(e.to_string()))?;

    if let Some(scheme) = uri.scheme_str() {
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(HandshakeError::Malformed(format!("unsupported scheme '{}'", scheme)).into());
        }
    }

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| pq.starts_with('/'))
        .unwrap_or("/")
        .to_string();

    let target = match uri.authority() {
        Some(authority) => TargetAddr::from_host(authority.host(), authority.port_u16().unwrap_or(80))?,
        None => {
            let host = head
                .header("host")
                .and_then(|h| std::str::from_utf8(h).ok())
                .ok_or_else(|| HandshakeError::Malformed("request has no target host".to_string()))?;
            TargetAddr::parse_authority(host, Some(80))?
        }
    };

    Ok((target, path))
}

/// Rewrite the head for the upstream server
fn rewrite_head(head: &RequestHead, target: &TargetAddr, path: &str) -> BytesMut {
    let mut out = BytesMut::with_capacity(head.len + 64);
    out.extend_from_slice(format!("{} {} HTTP/1.{}\r\n", head.method, path, head.version).as_bytes());

    if head.header("host").is_none() {
        out.extend_from_slice(format!("Host: {}\r\n", host_header_value(target)).as_bytes());
    }

    for (name, value) in &head.headers {
        let skip = PROXY_ONLY_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
            || name.eq_ignore_ascii_case(PROXY_MARKER_HEADER);
        if skip {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(format!("{}: {}\r\n\r\n", PROXY_MARKER_HEADER, PROXY_MARKER_VALUE).as_bytes());
    out
}

fn host_header_value(target: &TargetAddr) -> String {
    let host = match target {
        TargetAddr::Ip(addr) if addr.is_ipv6() => format!("[{}]", addr.ip()),
        _ => target.host(),
    };
    if target.port() == 80 {
        host
    } else {
        format!("{}:{}", host, target.port())
    }
}

/// Status code reported to the client for an error, if any
///
/// `None` means the client is already gone and nothing should be written.
pub fn status_for(err: &ProxyError) -> Option<StatusCode> {
    match err {
        ProxyError::Handshake(HandshakeError::Timeout) => Some(StatusCode::REQUEST_TIMEOUT),
        ProxyError::Handshake(HandshakeError::UnexpectedEof) => None,
        ProxyError::Handshake(_) => Some(StatusCode::BAD_REQUEST),
        ProxyError::UpstreamTimeout(_) => Some(StatusCode::GATEWAY_TIMEOUT),
        ProxyError::UpstreamConnect { .. } => Some(StatusCode::BAD_GATEWAY),
        ProxyError::ClientClosed | ProxyError::Io(_) | ProxyError::Relay(_) => None,
        _ => Some(StatusCode::BAD_GATEWAY),
    }
}

/// Write a bodiless error response
pub async fn write_error<W>(stream: &mut W, status: StatusCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Tell a CONNECT client its tunnel is ready
pub async fn write_established<W>(stream: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(CONNECT_ESTABLISHED).await?;
    stream.flush().await
}
