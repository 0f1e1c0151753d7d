//! Accept loop and connection bookkeeping
//!
//! A single task owns the listeners and the set of connection tasks. Everything
//! else talks to it through a [`ProxyHandle`].

use futures::StreamExt;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::common::{ConnectionInfo, HandshakeError, ProxyError, Result};
use crate::config::{Credentials, ProxyConfig};
use crate::protocol::{Negotiator, ProtocolKind};
use super::handler::handle_connection;
use super::message::{create_channel, ProxyHandle, ProxyMessage};
use super::server::ListenerSet;

/// Something that can be started in the background and controlled by a handle
pub trait ProxyService {
    /// Spawn the service on the current runtime
    fn start(self) -> Result<ProxyHandle>;
}

/// State owned by the service task
struct ProxyState {
    config: Arc<ProxyConfig>,
    /// Required SOCKS5 credentials, shared by every SOCKS5 negotiator
    socks5_auth: Option<Arc<Credentials>>,
    /// One task per open client connection
    tasks: JoinSet<()>,
    /// Connections accepted since startup
    total_connections: u64,
}

/// Serves every bound listener until shut down
pub struct StandardProxyService {
    listeners: ListenerSet,
    config: Arc<ProxyConfig>,
}

impl StandardProxyService {
    /// Wrap listeners bound by [`ListenerSet::bind`]
    pub fn new(listeners: ListenerSet, config: Arc<ProxyConfig>) -> Self {
        Self { listeners, config }
    }

    /// Accept, answer handle requests and reap finished connections until told to stop
    async fn run_service(self, mut rx: mpsc::Receiver<ProxyMessage>) {
        for (protocol, addr) in self.listeners.local_addrs() {
            info!("Proxy service accepting {} on {}", protocol, addr);
        }

        let mut incoming = self.listeners.into_incoming();
        let mut state = ProxyState {
            socks5_auth: self.config.socks5_auth.clone().map(Arc::new),
            config: self.config,
            tasks: JoinSet::new(),
            total_connections: 0,
        };
        let mut shutdown_done = None;

        loop {
            select! {
                Some((protocol, accept_result)) = incoming.next() => {
                    if let Ok((client_stream, client_addr)) = accept_result {
                        Self::spawn_connection(&mut state, protocol, client_stream, client_addr);
                    }
                }

                message = rx.recv() => match message {
                    Some(ProxyMessage::ActiveConnections { reply }) => {
                        let _ = reply.send(state.tasks.len());
                    }
                    Some(ProxyMessage::Shutdown { done }) => {
                        info!("Shutdown requested, closing listeners");
                        shutdown_done = done;
                        break;
                    }
                    None => {
                        info!("All proxy handles dropped, shutting down");
                        break;
                    }
                },

                Some(result) = state.tasks.join_next() => {
                    if let Err(e) = result {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        // Closing the listeners first refuses new clients during the drain
        drop(incoming);
        Self::drain(&mut state).await;

        info!("Proxy service shutdown complete ({} connections served)", state.total_connections);
        if let Some(done) = shutdown_done {
            let _ = done.send(());
        }
    }

    /// Start a task for one accepted connection
    fn spawn_connection(state: &mut ProxyState, protocol: ProtocolKind, client_stream: tokio::net::TcpStream, client_addr: SocketAddr) {
        debug!("New {} connection from {}", protocol, client_addr);

        if let Err(e) = client_stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", client_addr, e);
        }

        state.total_connections += 1;
        let conn_info = ConnectionInfo::new(client_addr, protocol);
        let negotiator = Negotiator::new(protocol, state.socks5_auth.clone());
        let config = Arc::clone(&state.config);

        state.tasks.spawn(async move {
            let result = handle_connection(negotiator, client_stream, conn_info.source, &config).await;
            let elapsed = conn_info.elapsed_ms();

            match result {
                Ok(stats) => debug!(
                    "{} connection from {} closed after {} ms ({} bytes up, {} bytes down)",
                    conn_info.protocol, conn_info.source, elapsed,
                    stats.client_to_upstream, stats.upstream_to_client
                ),
                Err(e) => log_failure(&conn_info, elapsed, &e),
            }
        });

        if state.tasks.len() % 100 == 0 {
            info!("Active connections: {}", state.tasks.len());
        }
    }

    /// Wait for open connections, aborting whatever is left at the timeout
    async fn drain(state: &mut ProxyState) {
        if state.tasks.is_empty() {
            return;
        }

        info!("Waiting for {} connections to complete...", state.tasks.len());
        let shutdown_timeout = state.config.shutdown_timeout();
        let tasks = &mut state.tasks;

        let drained = timeout(shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Connection task failed while draining: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, {} connections still active", state.tasks.len());
            state.tasks.shutdown().await;
        }
    }
}

/// Log a failed connection at a level matching who is at fault
fn log_failure(conn_info: &ConnectionInfo, elapsed: u128, err: &ProxyError) {
    match err {
        ProxyError::Handshake(HandshakeError::UnexpectedEof) | ProxyError::ClientClosed => debug!(
            "{} client {} went away after {} ms: {}",
            conn_info.protocol, conn_info.source, elapsed, err
        ),
        ProxyError::Handshake(_) => warn!(
            "Rejected {} handshake from {}: {}",
            conn_info.protocol, conn_info.source, err
        ),
        ProxyError::UpstreamConnect { .. } | ProxyError::UpstreamTimeout(_) => warn!(
            "{} request from {} failed: {}",
            conn_info.protocol, conn_info.source, err
        ),
        _ => debug!(
            "{} connection from {} ended with error after {} ms: {}",
            conn_info.protocol, conn_info.source, elapsed, err
        ),
    }
}

impl ProxyService for StandardProxyService {
    fn start(self) -> Result<ProxyHandle> {
        let (handle, rx) = create_channel();
        tokio::spawn(self.run_service(rx));

        Ok(handle)
    }
}
