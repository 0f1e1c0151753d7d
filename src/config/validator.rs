//! Configuration validator
//!
//! Checks run once at startup, before any socket is bound.

use std::collections::HashSet;

use crate::config::error::{ConfigError, Result};
use crate::config::ProxyConfig;

/// Levels `env_logger` understands as a bare filter
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Longest username or password RFC 1929 can carry
const MAX_CREDENTIAL_LEN: usize = 255;

/// Trait for validating configuration
pub trait ConfigValidator {
    /// Validate the configuration
    fn validate(&self) -> Result<()>;
}

impl ConfigValidator for ProxyConfig {
    fn validate(&self) -> Result<()> {
        validate_listeners(self)?;
        validate_general_settings(self)?;
        validate_auth_settings(self)?;
        Ok(())
    }
}

fn validate_listeners(config: &ProxyConfig) -> Result<()> {
    if config.listeners.is_empty() {
        return Err(ConfigError::NoListeners);
    }

    // Port 0 asks the kernel for a fresh port, so it never collides
    let mut seen = HashSet::new();
    for listener in config.listeners.iter().filter(|l| l.address.port() != 0) {
        if !seen.insert(listener.address) {
            return Err(ConfigError::DuplicateAddress(listener.address));
        }
    }

    Ok(())
}

fn validate_general_settings(config: &ProxyConfig) -> Result<()> {
    // Anything else would be read as a module filter and hide our logs
    if !LOG_LEVELS.iter().any(|level| level.eq_ignore_ascii_case(&config.log_level)) {
        return Err(ConfigError::InvalidValue {
            field: "log_level",
            reason: format!("'{}' is not one of {}", config.log_level, LOG_LEVELS.join(", ")),
        });
    }

    if config.buffer_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "buffer_size",
            reason: "Buffer size must be greater than 0".to_string(),
        });
    }

    let timeouts = [
        ("handshake_timeout", config.handshake_timeout),
        ("connect_timeout", config.connect_timeout),
        ("shutdown_timeout", config.shutdown_timeout),
    ];
    if let Some((field, _)) = timeouts.into_iter().find(|(_, secs)| *secs == 0) {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "Timeout must be at least one second".to_string(),
        });
    }

    Ok(())
}

/// SOCKS5 credentials must fit the RFC 1929 length bytes
fn validate_auth_settings(config: &ProxyConfig) -> Result<()> {
    let Some(creds) = &config.socks5_auth else {
        return Ok(());
    };

    for (field, value) in [("socks5_auth.username", &creds.username), ("socks5_auth.password", &creds.password)] {
        let reason = if value.is_empty() {
            "must not be empty".to_string()
        } else if value.len() > MAX_CREDENTIAL_LEN {
            format!("must be at most {} bytes", MAX_CREDENTIAL_LEN)
        } else {
            continue;
        };
        return Err(ConfigError::InvalidValue { field, reason });
    }

    Ok(())
}
