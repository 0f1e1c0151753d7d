//! Shared types module
//!
//! This module contains shared data types and structures used throughout the application.

use std::net::SocketAddr;
use std::time::SystemTime;

use crate::protocol::ProtocolKind;

/// Connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Source address
    pub source: SocketAddr,
    /// Protocol of the listener that accepted the connection
    pub protocol: ProtocolKind,
    /// Connection timestamp
    pub timestamp: SystemTime,
}

impl ConnectionInfo {
    /// Record a freshly accepted connection
    pub fn new(source: SocketAddr, protocol: ProtocolKind) -> Self {
        Self {
            source,
            protocol,
            timestamp: SystemTime::now(),
        }
    }

    /// Milliseconds since the connection was accepted
    pub fn elapsed_ms(&self) -> u128 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}
