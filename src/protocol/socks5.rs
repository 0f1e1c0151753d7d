//! SOCKS5 handshake
//!
//! Supports the "no authentication" method and, when credentials are
//! configured, username/password authentication (RFC 1929). Only the CONNECT
//! command is served.

use log::{debug, trace};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::address::{TargetAddr, ATYP_IPV4};
use super::{ProtocolKind, ProxyRequest};
use crate::common::{HandshakeError, ProxyError, Result};
use crate::config::Credentials;

/// Protocol version byte
pub const VERSION5: u8 = 0x05;
/// "No authentication required" method
pub const AUTH_NONE: u8 = 0x00;
/// Username/password method (RFC 1929)
pub const AUTH_USERPASS: u8 = 0x02;
/// No offered method is acceptable
pub const AUTH_NO_ACCEPT: u8 = 0xFF;

/// Version byte of the username/password sub-negotiation
pub const USERPASS_VERSION: u8 = 0x01;
/// Credentials accepted
pub const USERPASS_SUCCESS: u8 = 0x00;
/// Credentials rejected
pub const USERPASS_FAILURE: u8 = 0x01;

/// CONNECT command, the only one served
pub const CMD_CONNECT: u8 = 0x01;
/// BIND command (answered with [`REP_CMD_NOT_SUPPORTED`])
pub const CMD_BIND: u8 = 0x02;

/// Request granted
pub const REP_SUCCESS: u8 = 0x00;
/// Any failure without a more specific code, including handshake timeouts
pub const REP_GENERAL_FAILURE: u8 = 0x01;
/// Network unreachable
pub const REP_NETWORK_UNREACH: u8 = 0x03;
/// Host unreachable, unresolvable, or connect timed out
pub const REP_HOST_UNREACH: u8 = 0x04;
/// Connection refused by the target
pub const REP_CONN_REFUSED: u8 = 0x05;
/// Command other than CONNECT
pub const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
/// Unknown address type
pub const REP_ADDR_NOT_SUPPORTED: u8 = 0x08;

/// Run method negotiation, optional authentication and read the request
pub async fn negotiate<S>(stream: &mut S, auth: Option<&Credentials>) -> Result<ProxyRequest>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = negotiate_method(stream, auth.is_some()).await?;

    let user = match (method, auth) {
        (AUTH_USERPASS, Some(expected)) => Some(authenticate(stream, expected).await?),
        _ => None,
    };

    let target = read_request(stream).await?;
    Ok(ProxyRequest::tunnel(ProtocolKind::Socks5, target, user))
}

/// Read the greeting and answer with the selected method
///
/// A rejection (`0xFF`) is left to the failure reply so the connection is
/// closed right after it.
async fn negotiate_method<S>(stream: &mut S, require_auth: bool) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.map_err(ProxyError::from_handshake_io)?;
    if greeting[0] != VERSION5 {
        return Err(HandshakeError::UnexpectedVersion(greeting[0]).into());
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await.map_err(ProxyError::from_handshake_io)?;
    trace!("SOCKS5 client offered methods {:?}", methods);

    let wanted = if require_auth { AUTH_USERPASS } else { AUTH_NONE };
    if !methods.contains(&wanted) {
        return Err(HandshakeError::NoAcceptableAuth.into());
    }

    stream.write_all(&[VERSION5, wanted]).await?;
    stream.flush().await?;
    Ok(wanted)
}

/// Username/password sub-negotiation (RFC 1929)
async fn authenticate<S>(stream: &mut S, expected: &Credentials) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await.map_err(ProxyError::from_handshake_io)?;
    if version != USERPASS_VERSION {
        return Err(HandshakeError::UnexpectedVersion(version).into());
    }

    let username = read_short_field(stream).await?;
    let password = read_short_field(stream).await?;

    if username != expected.username.as_bytes() || password != expected.password.as_bytes() {
        debug!("SOCKS5 authentication failed for user {}", String::from_utf8_lossy(&username));
        return Err(HandshakeError::AuthFailed.into());
    }

    stream.write_all(&[USERPASS_VERSION, USERPASS_SUCCESS]).await?;
    stream.flush().await?;
    Ok(expected.username.clone())
}

/// Read a `[len:1][bytes]` field
async fn read_short_field<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u8().await.map_err(ProxyError::from_handshake_io)? as usize;
    let mut field = vec![0u8; len];
    stream.read_exact(&mut field).await.map_err(ProxyError::from_handshake_io)?;
    Ok(field)
}

/// Read `[0x05][cmd][0x00][atyp][addr][port:2]`
async fn read_request<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(ProxyError::from_handshake_io)?;
    if header[0] != VERSION5 {
        return Err(HandshakeError::UnexpectedVersion(header[0]).into());
    }

    let command = header[1];
    let target = TargetAddr::read_socks5(stream, header[3]).await?;

    if command != CMD_CONNECT {
        return Err(HandshakeError::UnsupportedCommand(command).into());
    }
    Ok(target)
}

/// Choose the reply code for an error
pub fn reply_code(err: &ProxyError) -> u8 {
    match err {
        ProxyError::Handshake(HandshakeError::UnsupportedCommand(_)) => REP_CMD_NOT_SUPPORTED,
        ProxyError::Handshake(HandshakeError::UnsupportedAddressType(_)) => REP_ADDR_NOT_SUPPORTED,
        ProxyError::UpstreamConnect { source, .. } => match source.kind() {
            io::ErrorKind::ConnectionRefused => REP_CONN_REFUSED,
            io::ErrorKind::NetworkUnreachable => REP_NETWORK_UNREACH,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NotFound
            | io::ErrorKind::TimedOut => REP_HOST_UNREACH,
            _ => REP_GENERAL_FAILURE,
        },
        ProxyError::UpstreamTimeout(_) => REP_HOST_UNREACH,
        _ => REP_GENERAL_FAILURE,
    }
}

/// Write a `[0x05][rep][0x00][atyp][addr][port:2]` reply
///
/// Without a bound address the reply carries `0.0.0.0:0`.
pub async fn write_reply<W>(stream: &mut W, rep: u8, bound: Option<SocketAddr>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut reply = vec![VERSION5, rep, 0x00];
    match bound {
        Some(addr) => reply.extend_from_slice(&TargetAddr::Ip(addr).to_socks5_bytes()),
        None => reply.extend_from_slice(&[ATYP_IPV4, 0, 0, 0, 0, 0, 0]),
    }
    stream.write_all(&reply).await?;
    stream.flush().await
}

/// Write the failure reply matching `err`
///
/// Method rejection and authentication failure have their own short frames.
pub async fn write_failure<W>(stream: &mut W, err: &ProxyError) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match err {
        ProxyError::Handshake(HandshakeError::NoAcceptableAuth) => {
            stream.write_all(&[VERSION5, AUTH_NO_ACCEPT]).await?;
            stream.flush().await
        }
        ProxyError::Handshake(HandshakeError::AuthFailed) => {
            stream.write_all(&[USERPASS_VERSION, USERPASS_FAILURE]).await?;
            stream.flush().await
        }
        _ => write_reply(stream, reply_code(err), None).await,
    }
}
