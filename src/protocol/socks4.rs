//! SOCKS4 and SOCKS4a handshake
//!
//! Request: `[0x04][cmd][port:2][ip:4][userid...0x00]`, followed by
//! `[domain...0x00]` when the IP is `0.0.0.x` with `x != 0` (SOCKS4a).
//! Reply: `[0x00][status][port:2][ip:4]`.

use log::trace;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::address::{TargetAddr, MAX_DOMAIN_LEN};
use super::{ProtocolKind, ProxyRequest};
use crate::common::{HandshakeError, ProxyError, Result};

/// Protocol version byte
pub const VERSION4: u8 = 0x04;
/// Version byte of a reply frame
pub const REPLY_VERSION: u8 = 0x00;
/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;
/// BIND command (not supported)
pub const CMD_BIND: u8 = 0x02;
/// Request granted
pub const REPLY_GRANTED: u8 = 0x5A;
/// Request rejected or failed
pub const REPLY_REJECTED: u8 = 0x5B;

/// Read a complete SOCKS4/4a request
///
/// The whole request is consumed before the command is checked, so the
/// rejection reply is never interleaved with unread request bytes.
pub async fn read_request<S>(stream: &mut S) -> Result<ProxyRequest>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    stream.read_exact(&mut header[..1]).await.map_err(ProxyError::from_handshake_io)?;
    if header[0] != VERSION4 {
        return Err(HandshakeError::UnexpectedVersion(header[0]).into());
    }
    stream.read_exact(&mut header[1..]).await.map_err(ProxyError::from_handshake_io)?;

    let command = header[1];
    let port = u16::from_be_bytes([header[2], header[3]]);
    let ip = Ipv4Addr::new(header[4], header[5], header[6], header[7]);

    let user_id = read_null_terminated(stream).await?;
    let user = if user_id.is_empty() { None } else { Some(user_id) };

    let target = if is_socks4a(&ip) {
        let domain = read_null_terminated(stream).await?;
        trace!("SOCKS4a request for domain {}", domain);
        TargetAddr::from_host(&domain, port)?
    } else {
        TargetAddr::Ip(SocketAddr::new(ip.into(), port))
    };

    if command != CMD_CONNECT {
        return Err(HandshakeError::UnsupportedCommand(command).into());
    }

    Ok(ProxyRequest::tunnel(ProtocolKind::Socks4, target, user))
}

/// `0.0.0.x` with a non-zero last octet marks a SOCKS4a request
fn is_socks4a(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[..3] == [0, 0, 0] && octets[3] != 0
}

/// Read a null-terminated field of at most [`MAX_DOMAIN_LEN`] bytes
async fn read_null_terminated<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut field = Vec::new();
    loop {
        let byte = stream.read_u8().await.map_err(ProxyError::from_handshake_io)?;
        if byte == 0 {
            break;
        }
        if field.len() == MAX_DOMAIN_LEN {
            return Err(HandshakeError::TooLarge.into());
        }
        field.push(byte);
    }
    String::from_utf8(field)
        .map_err(|_| HandshakeError::Malformed("field is not valid UTF-8".to_string()).into())
}

/// Build the 8-byte reply frame
///
/// The bound address is echoed only when it is IPv4; SOCKS4 has no way to
/// carry anything else.
pub fn reply_frame(status: u8, bound: Option<SocketAddr>) -> [u8; 8] {
    let mut frame = [REPLY_VERSION, status, 0, 0, 0, 0, 0, 0];
    if let Some(SocketAddr::V4(addr)) = bound {
        frame[2..4].copy_from_slice(&addr.port().to_be_bytes());
        frame[4..8].copy_from_slice(&addr.ip().octets());
    }
    frame
}

/// Write a reply frame
pub async fn write_reply<W>(stream: &mut W, status: u8, bound: Option<SocketAddr>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&reply_frame(status, bound)).await?;
    stream.flush().await
}
