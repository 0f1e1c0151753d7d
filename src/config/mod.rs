//! Proxy configuration
//!
//! Built from layers: defaults, an optional JSON file, `MULTI_PROXY_*`
//! variables and command line flags, then validated once.

pub mod defaults;
pub mod error;
mod loader;
mod merger;
mod validator;

pub use self::error::ConfigError;
pub use self::loader::{ConfigLoader, ConfigOverrides};
pub use self::merger::ConfigMerger;
pub use self::validator::ConfigValidator;
pub use self::defaults::{ENV_PREFIX, DEFAULT_CONFIG_FILE};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::common::parse_socket_addr;
use crate::protocol::ProtocolKind;

/// Custom deserializer for socket addresses, accepting host names too
fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_socket_addr(&s).map_err(serde::de::Error::custom)
}

/// One listening socket and the protocol it serves
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Protocol served on this socket
    pub protocol: ProtocolKind,
    /// Bind address; port 0 lets the kernel choose
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub address: SocketAddr,
}

impl ListenerConfig {
    /// Create a listener configuration
    pub fn new(protocol: ProtocolKind, address: SocketAddr) -> Self {
        Self { protocol, address }
    }
}

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.protocol, self.address)
    }
}

/// SOCKS5 username/password credentials
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    /// Expected username
    pub username: String,
    /// Expected password
    pub password: String,
}

// Keep passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the proxy needs to start
///
/// Missing fields in a file take their default values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listening sockets, one protocol each
    pub listeners: Vec<ListenerConfig>,

    /// One of error, warn, info, debug, trace
    pub log_level: String,

    /// Relay buffer per direction, in bytes
    pub buffer_size: usize,

    /// Seconds a client may take to finish its handshake
    pub handshake_timeout: u64,

    /// Seconds to wait for the upstream connection
    pub connect_timeout: u64,

    /// Seconds open connections get to finish at shutdown
    pub shutdown_timeout: u64,

    /// When set, SOCKS5 clients must authenticate with these credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks5_auth: Option<Credentials>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listeners: defaults::listeners(),
            log_level: defaults::log_level(),
            buffer_size: defaults::buffer_size(),
            handshake_timeout: defaults::handshake_timeout(),
            connect_timeout: defaults::connect_timeout(),
            shutdown_timeout: defaults::shutdown_timeout(),
            socks5_auth: None,
        }
    }
}

// Lets merge take either owned or borrowed configs
impl AsRef<ProxyConfig> for ProxyConfig {
    fn as_ref(&self) -> &ProxyConfig {
        self
    }
}

impl ProxyConfig {
    /// Handshake timeout as a duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Upstream connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Shutdown grace period as a duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Print the effective configuration at startup
pub fn log_config(config: &ProxyConfig) {
    use log::info;

    if !log::log_enabled!(log::Level::Info) {
        return;
    }

    for listener in &config.listeners {
        info!("Listener: {}", listener);
    }
    info!(
        "Log level {}, relay buffer {} bytes",
        config.log_level, config.buffer_size
    );
    info!(
        "Timeouts: handshake {}s, connect {}s, shutdown {}s",
        config.handshake_timeout, config.connect_timeout, config.shutdown_timeout
    );
    match &config.socks5_auth {
        Some(creds) => info!("SOCKS5 requires username/password (user {})", creds.username),
        None => info!("SOCKS5 requires no authentication"),
    }
}
