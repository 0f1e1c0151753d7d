//! Configuration errors

use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file does not exist
    FileNotFound(PathBuf),

    /// Configuration file exists but could not be read
    FileRead {
        /// File path
        path: PathBuf,
        /// Reader error
        reason: String,
    },

    /// Configuration file is not valid JSON for [`super::ProxyConfig`]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser error
        reason: String,
    },

    /// A field holds a value the proxy cannot run with
    InvalidValue {
        /// Field name as written in the file
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// No listener is configured
    NoListeners,

    /// Two listeners ask for the same address
    DuplicateAddress(SocketAddr),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) =>
                write!(f, "Configuration file not found: {}", path.display()),

            ConfigError::FileRead { path, reason } =>
                write!(f, "Error reading configuration file {}: {}", path.display(), reason),

            ConfigError::Parse { path, reason } =>
                write!(f, "Error parsing configuration file {}: {}", path.display(), reason),

            ConfigError::InvalidValue { field, reason } =>
                write!(f, "Invalid value for '{}': {}", field, reason),

            ConfigError::NoListeners =>
                write!(f, "At least one listener must be configured"),

            ConfigError::DuplicateAddress(addr) =>
                write!(f, "Address {} is used by more than one listener", addr),
        }
    }
}

impl Error for ConfigError {}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for crate::common::ProxyError {
    fn from(err: ConfigError) -> Self {
        crate::common::ProxyError::Config(err.to_string())
    }
}
