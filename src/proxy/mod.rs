//! Proxy service module
//!
//! This module implements the core functionality of the proxy service:
//! listening sockets, per-connection handling and data relaying.
//!
//! The proxy service uses a message-driven architecture. One task owns the
//! listeners and the connection tasks; callers control it through a
//! [`ProxyHandle`].

pub mod server;
mod handler;
mod forwarder;
mod message;
mod service;

pub use server::{Listener, ListenerSet};
pub use forwarder::{relay, RelayOptions, RelayStats};
pub use handler::handle_connection;
pub use message::{create_channel, ProxyHandle, ProxyMessage};
pub use service::{ProxyService, StandardProxyService};
