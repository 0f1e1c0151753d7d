//! Configuration loading functionality
//!
//! This module provides functionality for loading configuration from different sources
//! such as files, environment variables, and command-line arguments.

use log::debug;
use std::env;
use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use crate::common::{ProxyError, Result};
use crate::config::defaults::{self, ENV_PREFIX};
use crate::config::error::ConfigError;
use crate::config::{Credentials, ListenerConfig, ProxyConfig};
use crate::protocol::ProtocolKind;

/// Trait for loading configuration from different sources
pub trait ConfigLoader {
    /// Load configuration from a JSON file
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> where Self: Sized;

    /// Load configuration from environment variables
    fn from_env() -> Result<Self> where Self: Sized;

    /// Create configuration from command line values
    fn from_args(overrides: &ConfigOverrides) -> Result<Self> where Self: Sized;
}

impl ConfigLoader for ProxyConfig {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::FileRead { path: path.to_path_buf(), reason: e.to_string() },
        })?;

        let config = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), reason: e.to_string() })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn from_env() -> Result<Self> {
        ConfigOverrides::from_env()?.apply(Self::default())
    }

    fn from_args(overrides: &ConfigOverrides) -> Result<Self> {
        overrides.apply(Self::default())
    }
}

/// Individually overridable settings
///
/// Shared by the command line and the environment. `None` keeps the value
/// from lower-priority sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Bind host for every listener
    pub host: Option<IpAddr>,
    /// SOCKS4 listener port
    pub socks4_port: Option<u16>,
    /// SOCKS5 listener port
    pub socks5_port: Option<u16>,
    /// HTTP listener port
    pub http_port: Option<u16>,
    /// Log level
    pub log_level: Option<String>,
    /// Relay buffer size
    pub buffer_size: Option<usize>,
    /// Handshake timeout in seconds
    pub handshake_timeout: Option<u64>,
    /// Connect timeout in seconds
    pub connect_timeout: Option<u64>,
    /// SOCKS5 username
    pub socks5_username: Option<String>,
    /// SOCKS5 password
    pub socks5_password: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides from `MULTI_PROXY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let get_env = |name: &str| -> Option<String> {
            env::var(format!("{}{}", ENV_PREFIX, name)).ok()
        };

        // Helper to parse an optional variable, naming it in the error
        fn parse<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
            value
                .map(|v| {
                    v.trim().parse::<T>().map_err(|_| {
                        ProxyError::Config(format!("Invalid value for {}{}: {}", ENV_PREFIX, name, v))
                    })
                })
                .transpose()
        }

        let overrides = Self {
            host: parse("HOST", get_env("HOST"))?,
            socks4_port: parse("SOCKS4_PORT", get_env("SOCKS4_PORT"))?,
            socks5_port: parse("SOCKS5_PORT", get_env("SOCKS5_PORT"))?,
            http_port: parse("HTTP_PORT", get_env("HTTP_PORT"))?,
            log_level: get_env("LOG_LEVEL"),
            buffer_size: parse("BUFFER_SIZE", get_env("BUFFER_SIZE"))?,
            handshake_timeout: parse("HANDSHAKE_TIMEOUT", get_env("HANDSHAKE_TIMEOUT"))?,
            connect_timeout: parse("CONNECT_TIMEOUT", get_env("CONNECT_TIMEOUT"))?,
            socks5_username: get_env("SOCKS5_USERNAME"),
            socks5_password: get_env("SOCKS5_PASSWORD"),
        };

        debug!("Environment overrides: {:?}", overrides.redacted());
        Ok(overrides)
    }

    /// Apply the overrides on top of `config`
    pub fn apply(&self, mut config: ProxyConfig) -> Result<ProxyConfig> {
        if let Some(host) = self.host {
            for listener in &mut config.listeners {
                listener.address.set_ip(host);
            }
        }

        let ports = [
            (ProtocolKind::Socks4, self.socks4_port),
            (ProtocolKind::Socks5, self.socks5_port),
            (ProtocolKind::Http, self.http_port),
        ];
        for (protocol, port) in ports {
            let Some(port) = port else { continue };
            let mut found = false;
            for listener in config.listeners.iter_mut().filter(|l| l.protocol == protocol) {
                listener.address.set_port(port);
                found = true;
            }
            if !found {
                let host = self.host.unwrap_or(defaults::HOST);
                config.listeners.push(ListenerConfig::new(protocol, SocketAddr::new(host, port)));
            }
        }

        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(timeout) = self.handshake_timeout {
            config.handshake_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }

        match (&self.socks5_username, &self.socks5_password) {
            (Some(username), Some(password)) => {
                config.socks5_auth = Some(Credentials {
                    username: username.clone(),
                    password: password.clone(),
                });
            }
            (None, None) => {}
            _ => {
                return Err(ProxyError::Config(
                    "SOCKS5 username and password must be given together".to_string(),
                ));
            }
        }

        Ok(config)
    }

    /// Copy safe to log
    fn redacted(&self) -> Self {
        Self {
            socks5_password: self.socks5_password.as_ref().map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }
}
