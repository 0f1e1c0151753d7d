//! Common module
//!
//! This module contains shared types, errors, and utility functions used throughout the application.

pub mod error;
pub mod log;
pub mod net;
pub mod types;

// Re-export commonly used types and functions
pub use error::{HandshakeError, ProxyError, Result};
pub use log::init_logger;
pub use net::{bind_listener, parse_socket_addr};
pub use types::ConnectionInfo;
