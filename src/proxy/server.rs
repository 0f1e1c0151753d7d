//! Proxy server module
//!
//! This module owns the listening sockets. Each listener is tagged with
//! the protocol it serves; all of them are merged into one stream of
//! accepted connections for the service loop.

use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::common::{bind_listener, ProxyError, Result};
use crate::config::{ListenerConfig, ProxyConfig};
use crate::protocol::ProtocolKind;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// An accepted connection, or the error from `accept`
pub type AcceptEvent = (ProtocolKind, io::Result<(TcpStream, SocketAddr)>);

/// All listeners merged into one stream
pub type Incoming = SelectAll<BoxStream<'static, AcceptEvent>>;

/// One bound listening socket
#[derive(Debug)]
pub struct Listener {
    /// Protocol served
    protocol: ProtocolKind,
    /// Tokio listener
    inner: TcpListener,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind a listener
    ///
    /// # Parameters
    ///
    /// * `config` - Protocol and address to bind
    ///
    /// # Returns
    ///
    /// The bound listener, or a [`ProxyError::Bind`] naming the address
    pub fn bind(config: &ListenerConfig) -> Result<Self> {
        let bind_error = |source| ProxyError::Bind {
            protocol: config.protocol,
            addr: config.address,
            source,
        };

        let std_listener = bind_listener(config.address).map_err(bind_error)?;
        let inner = TcpListener::from_std(std_listener).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        info!("Listening for {} connections on {}", config.protocol, local_addr);

        Ok(Self {
            protocol: config.protocol,
            inner,
            local_addr,
        })
    }

    /// Protocol served by this listener
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Bound address, with the real port when port 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endless stream of accept results
    fn into_stream(self) -> BoxStream<'static, AcceptEvent> {
        stream::unfold(self, |listener| async move {
            let result = listener.inner.accept().await;
            if let Err(e) = &result {
                error!("Error accepting {} connection on {}: {}", listener.protocol, listener.local_addr, e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
            Some(((listener.protocol, result), listener))
        })
        .boxed()
    }
}

/// The full set of listeners for one proxy instance
#[derive(Debug)]
pub struct ListenerSet {
    listeners: Vec<Listener>,
}

impl ListenerSet {
    /// Bind every configured listener
    ///
    /// Fails on the first listener that cannot be bound; sockets bound
    /// before it are closed again.
    pub fn bind(config: &ProxyConfig) -> Result<Self> {
        let listeners = config
            .listeners
            .iter()
            .map(Listener::bind)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { listeners })
    }

    /// Protocol and bound address of every listener, in configuration order
    pub fn local_addrs(&self) -> Vec<(ProtocolKind, SocketAddr)> {
        self.listeners
            .iter()
            .map(|l| (l.protocol(), l.local_addr()))
            .collect()
    }

    /// Bound address of the first listener serving `protocol`
    pub fn local_addr(&self, protocol: ProtocolKind) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.protocol() == protocol)
            .map(Listener::local_addr)
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether the set has no listeners
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Merge all listeners into one stream of accepted connections
    ///
    /// Dropping the stream closes the listening sockets.
    pub fn into_incoming(self) -> Incoming {
        stream::select_all(self.listeners.into_iter().map(Listener::into_stream))
    }
}
