//! Target address model
//!
//! A proxied request names its target either by IP or by domain. Domains are
//! resolved only when the upstream connection is opened.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{lookup_host, TcpStream};

use crate::common::{HandshakeError, ProxyError, Result};

/// SOCKS5 address type: IPv4
pub const ATYP_IPV4: u8 = 0x01;
/// SOCKS5 address type: domain name
pub const ATYP_DOMAIN: u8 = 0x03;
/// SOCKS5 address type: IPv6
pub const ATYP_IPV6: u8 = 0x04;

/// Longest domain a length-prefixed or null-terminated field may carry
pub const MAX_DOMAIN_LEN: usize = 255;

/// Where a proxied connection should go
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// Literal IP address and port
    Ip(SocketAddr),
    /// Domain name and port, resolved at connect time
    Domain(String, u16),
}

impl TargetAddr {
    /// Build a target from a host string, recognising IP literals
    pub fn from_host(host: &str, port: u16) -> Result<Self> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(HandshakeError::Malformed("empty host".to_string()).into());
        }
        if host.len() > MAX_DOMAIN_LEN {
            return Err(HandshakeError::TooLarge.into());
        }
        Ok(match host.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(_) => TargetAddr::Domain(host.to_string(), port),
        })
    }

    /// Parse an authority such as `example.com:443`, `10.0.0.1:80` or `[::1]:8080`
    ///
    /// `default_port` is used when the authority has no port.
    pub fn parse_authority(authority: &str, default_port: Option<u16>) -> Result<Self> {
        let authority = authority.trim();
        let malformed = || ProxyError::from(HandshakeError::Malformed(format!("bad authority '{}'", authority)));

        // Bracketed IPv6, with or without a port
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(malformed)?;
            let port = match after.strip_prefix(':') {
                Some(port) => port.parse::<u16>().map_err(|_| malformed())?,
                None if after.is_empty() => default_port.ok_or_else(malformed)?,
                None => return Err(malformed()),
            };
            let ip = host.parse::<Ipv6Addr>().map_err(|_| malformed())?;
            return Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port)));
        }

        match authority.rsplit_once(':') {
            // A bare IPv6 literal has several colons and no usable port
            Some((host, port)) if !host.contains(':') => {
                let port = port.parse::<u16>().map_err(|_| malformed())?;
                Self::from_host(host, port)
            }
            _ => {
                let port = default_port.ok_or_else(malformed)?;
                Self::from_host(authority, port)
            }
        }
    }

    /// Target port
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Host part as text
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(host, _) => host.clone(),
        }
    }

    /// Read a SOCKS5 `[addr][port:2]` field for the given address type
    pub async fn read_socks5<R>(reader: &mut R, atyp: u8) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await.map_err(ProxyError::from_handshake_io)?;
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await.map_err(ProxyError::from_handshake_io)? as usize;
                if len == 0 {
                    return Err(HandshakeError::Malformed("empty domain".to_string()).into());
                }
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await.map_err(ProxyError::from_handshake_io)?;
                let host = std::str::from_utf8(&buf[..len])
                    .map_err(|_| HandshakeError::Malformed("domain is not valid UTF-8".to_string()))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Self::from_host(host, port)
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await.map_err(ProxyError::from_handshake_io)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
            }
            other => Err(HandshakeError::UnsupportedAddressType(other).into()),
        }
    }

    /// Encode as a SOCKS5 `[atyp][addr][port:2]` field
    pub fn to_socks5_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(22);
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Domain(host, _) => {
                let bytes = host.as_bytes();
                let len = bytes.len().min(MAX_DOMAIN_LEN);
                out.push(ATYP_DOMAIN);
                out.push(len as u8);
                out.extend_from_slice(&bytes[..len]);
            }
        }
        out.extend_from_slice(&self.port().to_be_bytes());
        out
    }

    /// Open a TCP connection to the target
    ///
    /// Domains are resolved first; every resolved address is tried in order.
    /// A resolution failure is reported as `NotFound` so callers can tell it
    /// apart from a refused connection.
    pub async fn connect(&self) -> io::Result<TcpStream> {
        match self {
            TargetAddr::Ip(addr) => TcpStream::connect(addr).await,
            TargetAddr::Domain(host, port) => {
                let addrs = lookup_host((host.as_str(), *port)).await.map_err(|e| {
                    io::Error::new(io::ErrorKind::NotFound, format!("failed to resolve {}: {}", host, e))
                })?;

                let mut last_err = None;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => return Ok(stream),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for {}", host))
                }))
            }
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}
