//! Connection handler module
//!
//! This module drives one client connection through its lifecycle:
//! handshake, upstream connect, success reply and relay.

use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::select;
use tokio::time::timeout;

use crate::common::{HandshakeError, ProxyError, Result};
use crate::config::ProxyConfig;
use crate::protocol::{Negotiator, TargetAddr};
use super::forwarder::{relay, RelayOptions, RelayStats};

/// Handle a single client connection
///
/// Failures before the relay starts are answered with the protocol's
/// failure reply, then returned.
///
/// # Parameters
///
/// * `negotiator` - Handshake for the listener's protocol
/// * `client` - Client TCP stream
/// * `peer` - Client address
/// * `config` - Proxy configuration
///
/// # Returns
///
/// Returns the relay byte totals, or the error that ended the connection.
pub async fn handle_connection(
    negotiator: Negotiator,
    mut client: TcpStream,
    peer: SocketAddr,
    config: &ProxyConfig,
) -> Result<RelayStats> {
    let protocol = negotiator.kind();

    // Read the handshake under the handshake timeout
    let request = match timeout(config.handshake_timeout(), negotiator.negotiate(&mut client)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => return Err(reject(&negotiator, &mut client, e).await),
        Err(_) => {
            let e = ProxyError::Handshake(HandshakeError::Timeout);
            return Err(reject(&negotiator, &mut client, e).await);
        }
    };

    match &request.user {
        Some(user) => debug!("{} request from {} (user {}) to {}", protocol, peer, user, request.target),
        None => debug!("{} request from {} to {}", protocol, peer, request.target),
    }

    let watch = if request.has_pending_data() { ClientWatch::ResetOnly } else { ClientWatch::CloseOrReset };
    let upstream = match connect_upstream(&client, &request.target, config.connect_timeout(), watch).await {
        Ok(upstream) => upstream,
        Err(e) => return Err(reject(&negotiator, &mut client, e).await),
    };

    if let Err(e) = upstream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on upstream socket: {}", e);
    }
    let bound = upstream.local_addr()?;
    debug!("Connected to {} from {}", request.target, bound);

    negotiator.reply_success(&mut client, &request, bound).await?;

    let options = RelayOptions {
        buffer_size: config.buffer_size,
        initial_upstream: request.initial_upstream,
    };
    relay(client, upstream, options).await
}

/// Which client events abandon a pending upstream connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientWatch {
    /// EOF or a socket error
    CloseOrReset,
    /// Only a socket error; EOF is a half-close to pass on after connecting
    ResetOnly,
}

/// Connect to the target while watching for the client to hang up
///
/// A client that goes away cancels the attempt. Once the client has sent
/// bytes past the handshake it is no longer watched; those bytes are
/// relayed after the connection is up.
async fn connect_upstream(
    client: &TcpStream,
    target: &TargetAddr,
    connect_timeout: Duration,
    watch: ClientWatch,
) -> Result<TcpStream> {
    let connect = timeout(connect_timeout, target.connect());
    tokio::pin!(connect);

    let mut peek_buf = [0u8; 1];
    let result = select! {
        result = &mut connect => result,
        peeked = client.peek(&mut peek_buf) => match peeked {
            Ok(0) if watch == ClientWatch::ResetOnly => {
                debug!("Client half-closed while connecting to {}, request still pending", target);
                connect.await
            }
            Ok(0) | Err(_) => {
                debug!("Client closed while connecting to {}", target);
                return Err(ProxyError::ClientClosed);
            }
            Ok(_) => connect.await,
        },
    };

    match result {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::upstream(target, e)),
        Err(_) => Err(ProxyError::UpstreamTimeout(target.to_string())),
    }
}

/// Send the failure reply for `err` and hand the error back
async fn reject(negotiator: &Negotiator, client: &mut TcpStream, err: ProxyError) -> ProxyError {
    if let Err(e) = negotiator.reply_failure(client, &err).await {
        debug!("Failed to send failure reply: {}", e);
    }
    err
}
