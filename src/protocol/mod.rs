//! Protocol negotiation module
//!
//! Each listener serves exactly one protocol, so the negotiator is chosen
//! from the listener's tag at accept time and never by sniffing bytes.
//! The negotiator reads the handshake, yields a [`ProxyRequest`] and knows
//! how to write the protocol's success and failure replies.

pub mod address;
pub mod http;
pub mod socks4;
pub mod socks5;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub use address::TargetAddr;

use crate::common::{ProxyError, Result};
use crate::config::Credentials;

/// Protocol served by a listener
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// SOCKS4 and SOCKS4a
    Socks4,
    /// SOCKS5
    Socks5,
    /// HTTP CONNECT and plain forwarding
    Http,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socks4 => write!(f, "socks4"),
            Self::Socks5 => write!(f, "socks5"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "socks4" | "socks4a" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            "http" => Ok(Self::Http),
            _ => Err(ProxyError::Config(format!(
                "Invalid protocol: {}. Valid values are: socks4, socks5, http",
                s
            ))),
        }
    }
}

/// How the relay treats the connection once the target is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Raw tunnel, announced to the client with a success reply
    Tunnel,
    /// Plain HTTP request forwarded upstream; the upstream answers the client
    Forward,
}

/// A negotiated request, consumed once by the connection handler
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Protocol the request arrived on
    pub protocol: ProtocolKind,
    /// Where to connect
    pub target: TargetAddr,
    /// SOCKS4 user-id or authenticated SOCKS5 username
    pub user: Option<String>,
    /// Tunnel or plain forward
    pub mode: RequestMode,
    /// Bytes to write upstream before relaying client bytes
    pub initial_upstream: Bytes,
}

impl ProxyRequest {
    /// A raw tunnel request
    pub fn tunnel(protocol: ProtocolKind, target: TargetAddr, user: Option<String>) -> Self {
        Self {
            protocol,
            target,
            user,
            mode: RequestMode::Tunnel,
            initial_upstream: Bytes::new(),
        }
    }

    /// A plain HTTP request whose rewritten head is `initial_upstream`
    pub fn forward(target: TargetAddr, initial_upstream: Bytes) -> Self {
        Self {
            protocol: ProtocolKind::Http,
            target,
            user: None,
            mode: RequestMode::Forward,
            initial_upstream,
        }
    }

    /// Attach client bytes that were read past the handshake
    pub fn with_initial_upstream(mut self, bytes: Bytes) -> Self {
        self.initial_upstream = bytes;
        self
    }

    /// Whether client data is already queued for the upstream
    ///
    /// Such a request must still be delivered if the client shuts down its
    /// write side before the upstream connection is up.
    pub fn has_pending_data(&self) -> bool {
        self.mode == RequestMode::Forward || !self.initial_upstream.is_empty()
    }
}

/// Per-protocol handshake state machine
#[derive(Debug, Clone)]
pub enum Negotiator {
    /// SOCKS4/4a
    Socks4,
    /// SOCKS5, with credentials when username/password auth is required
    Socks5 {
        /// Required credentials, if any
        auth: Option<Arc<Credentials>>,
    },
    /// HTTP CONNECT and plain forwarding
    Http,
}

impl Negotiator {
    /// Build the negotiator for a listener's protocol
    pub fn new(kind: ProtocolKind, socks5_auth: Option<Arc<Credentials>>) -> Self {
        match kind {
            ProtocolKind::Socks4 => Self::Socks4,
            ProtocolKind::Socks5 => Self::Socks5 { auth: socks5_auth },
            ProtocolKind::Http => Self::Http,
        }
    }

    /// Protocol handled by this negotiator
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Socks4 => ProtocolKind::Socks4,
            Self::Socks5 { .. } => ProtocolKind::Socks5,
            Self::Http => ProtocolKind::Http,
        }
    }

    /// Consume the handshake bytes and return the request
    pub async fn negotiate<S>(&self, stream: &mut S) -> Result<ProxyRequest>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Self::Socks4 => socks4::read_request(stream).await,
            Self::Socks5 { auth } => socks5::negotiate(stream, auth.as_deref()).await,
            Self::Http => http::negotiate(stream).await,
        }
    }

    /// Tell the client its tunnel is ready
    ///
    /// `bound` is the local address of the upstream socket. Forwarded HTTP
    /// requests get no reply from the proxy.
    pub async fn reply_success<W>(&self, stream: &mut W, request: &ProxyRequest, bound: SocketAddr) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            Self::Socks4 => socks4::write_reply(stream, socks4::REPLY_GRANTED, Some(bound)).await,
            Self::Socks5 { .. } => socks5::write_reply(stream, socks5::REP_SUCCESS, Some(bound)).await,
            Self::Http => match request.mode {
                RequestMode::Tunnel => http::write_established(stream).await,
                RequestMode::Forward => Ok(()),
            },
        }
    }

    /// Send the protocol's failure reply for `err`
    ///
    /// Nothing is written when the client is known to be gone.
    pub async fn reply_failure<W>(&self, stream: &mut W, err: &ProxyError) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if client_gone(err) {
            return Ok(());
        }
        match self {
            Self::Socks4 => socks4::write_reply(stream, socks4::REPLY_REJECTED, None).await,
            Self::Socks5 { .. } => socks5::write_failure(stream, err).await,
            Self::Http => match http::status_for(err) {
                Some(status) => http::write_error(stream, status).await,
                None => Ok(()),
            },
        }
    }
}

/// Errors after which writing to the client is pointless
fn client_gone(err: &ProxyError) -> bool {
    matches!(
        err,
        ProxyError::ClientClosed
            | ProxyError::Io(_)
            | ProxyError::Relay(_)
            | ProxyError::Handshake(crate::common::HandshakeError::UnexpectedEof)
    )
}
