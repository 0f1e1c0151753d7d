//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use thiserror::Error;
use std::io;
use std::net::SocketAddr;

use crate::protocol::ProtocolKind;

/// Multi-protocol proxy error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A listener could not be bound at startup
    #[error("Failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        /// Protocol served by the listener
        protocol: ProtocolKind,
        /// Requested bind address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The client sent bytes the negotiator cannot accept
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Opening the upstream connection failed
    #[error("Failed to connect to {target}: {source}")]
    UpstreamConnect {
        /// Requested target
        target: String,
        /// Underlying socket or resolver error
        #[source]
        source: io::Error,
    },

    /// Opening the upstream connection took longer than the connect timeout
    #[error("Timed out connecting to {0}")]
    UpstreamTimeout(String),

    /// The client closed its leg before the upstream connection was ready
    #[error("Client closed the connection before the tunnel was established")]
    ClientClosed,

    /// Mid-stream socket error while relaying
    #[error("Relay error: {0}")]
    Relay(io::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Reasons a protocol handshake is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Version byte does not match the listener's protocol
    #[error("unexpected protocol version 0x{0:02x}")]
    UnexpectedVersion(u8),

    /// Command other than CONNECT
    #[error("unsupported command 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// SOCKS5 address type other than IPv4, domain or IPv6
    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),

    /// The client offered no authentication method we accept
    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    /// Username/password sub-negotiation failed
    #[error("authentication failed")]
    AuthFailed,

    /// Bytes that do not form a valid request
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Request head or field exceeds its size limit
    #[error("request too large")]
    TooLarge,

    /// The client closed the connection in the middle of the handshake
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The handshake did not complete in time
    #[error("handshake timed out")]
    Timeout,
}

impl ProxyError {
    /// Build an upstream connect error for the given target
    pub fn upstream(target: impl ToString, source: io::Error) -> Self {
        ProxyError::UpstreamConnect {
            target: target.to_string(),
            source,
        }
    }

    /// Map short reads during a handshake to [`HandshakeError::UnexpectedEof`]
    pub fn from_handshake_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProxyError::Handshake(HandshakeError::UnexpectedEof)
        } else {
            ProxyError::Io(err)
        }
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
