//! Multi Proxy: SOCKS4, SOCKS5 and HTTP forward proxy
//!
//! This library implements a forward proxy that serves three listeners from
//! a single event loop. Each listener speaks one protocol:
//!
//! - SOCKS4 and SOCKS4a `CONNECT`
//! - SOCKS5 `CONNECT`, without authentication or with username/password
//! - HTTP `CONNECT` tunnels and plain HTTP forwarding, which marks the
//!   forwarded request with an `X-Proxy: http` header
//!
//! After the handshake the proxy connects to the requested target and
//! relays bytes in both directions until both sides are done.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use multi_proxy::{ListenerSet, ProxyConfig, ProxyService, Result, StandardProxyService};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(ProxyConfig::default());
//!
//!     // Bind every listener before serving anything
//!     let listeners = ListenerSet::bind(&config)?;
//!
//!     let handle = StandardProxyService::new(listeners, config).start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod protocol;
pub mod proxy;

// Re-export commonly used structures and functions for convenience
pub use common::{ProxyError, Result, parse_socket_addr};
pub use config::ProxyConfig;
pub use protocol::ProtocolKind;
pub use proxy::{ListenerSet, ProxyHandle, ProxyService, StandardProxyService};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
