//! Default configuration values
//!
//! This module provides default values for configuration options.
//! It is the single source of truth for defaults, shared by serde,
//! the merger and the command line.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::ListenerConfig;
use crate::protocol::ProtocolKind;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "MULTI_PROXY_";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default bind host for the fixed listeners
pub const HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default SOCKS4 port
pub const SOCKS4_PORT: u16 = 20104;

/// Default SOCKS5 port
pub const SOCKS5_PORT: u16 = 20105;

/// Default HTTP port
pub const HTTP_PORT: u16 = 20106;

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default port for a protocol
pub fn port_for(protocol: ProtocolKind) -> u16 {
    match protocol {
        ProtocolKind::Socks4 => SOCKS4_PORT,
        ProtocolKind::Socks5 => SOCKS5_PORT,
        ProtocolKind::Http => HTTP_PORT,
    }
}

/// The three fixed listeners on the given host
pub fn listeners_on(host: IpAddr) -> Vec<ListenerConfig> {
    [ProtocolKind::Socks4, ProtocolKind::Socks5, ProtocolKind::Http]
        .into_iter()
        .map(|protocol| ListenerConfig::new(protocol, SocketAddr::new(host, port_for(protocol))))
        .collect()
}

/// Default listeners
pub fn listeners() -> Vec<ListenerConfig> {
    listeners_on(HOST)
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default relay buffer size (8KB)
pub fn buffer_size() -> usize {
    8192
}

/// Default handshake timeout in seconds
pub fn handshake_timeout() -> u64 {
    10
}

/// Default upstream connect timeout in seconds
pub fn connect_timeout() -> u64 {
    30
}

/// Default grace period for open connections at shutdown, in seconds
pub fn shutdown_timeout() -> u64 {
    30
}
