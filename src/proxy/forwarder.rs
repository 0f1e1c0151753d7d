//! Data forwarding module
//!
//! This module relays bytes between the client and the upstream once a
//! tunnel is established. Each direction is pumped independently; EOF on
//! one side half-closes the other, an error on either tears down both.

use bytes::Bytes;
use log::debug;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{ProxyError, Result};

/// Relay settings for one connection
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// Size of each direction's read buffer
    pub buffer_size: usize,
    /// Written upstream before any client bytes
    pub initial_upstream: Bytes,
}

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream, including the initial bytes
    pub client_to_upstream: u64,
    /// Upstream to client
    pub upstream_to_client: u64,
}

/// Relay data between two streams until both directions are finished
///
/// # Parameters
///
/// * `client` - Client stream
/// * `upstream` - Upstream stream
/// * `options` - Buffer size and bytes to send upstream first
///
/// # Returns
///
/// Returns the byte totals, or the first error seen in either direction.
pub async fn relay<C, U>(client: C, upstream: U, options: RelayOptions) -> Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let buffer_size = options.buffer_size.max(1);
    let initial = options.initial_upstream;

    let (mut client_reader, mut client_writer) = tokio::io::split(client);
    let (mut upstream_reader, mut upstream_writer) = tokio::io::split(upstream);

    // Data flow from client to upstream
    let client_to_upstream = async {
        let mut total = 0u64;
        if !initial.is_empty() {
            upstream_writer.write_all(&initial).await?;
            total += initial.len() as u64;
        }
        total += pump(&mut client_reader, &mut upstream_writer, buffer_size).await?;
        debug!("Client to upstream transferred {} bytes total", total);
        Ok::<_, io::Error>(total)
    };

    // Data flow from upstream to client
    let upstream_to_client = async {
        let total = pump(&mut upstream_reader, &mut client_writer, buffer_size).await?;
        debug!("Upstream to client transferred {} bytes total", total);
        Ok::<_, io::Error>(total)
    };

    let (client_to_upstream, upstream_to_client) =
        tokio::try_join!(client_to_upstream, upstream_to_client).map_err(ProxyError::Relay)?;

    Ok(RelayStats {
        client_to_upstream,
        upstream_to_client,
    })
}

/// Copy until EOF, then shut down the writer's send side
async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
    }

    // The peer may already be gone; the other direction reports real errors
    if let Err(e) = writer.shutdown().await {
        debug!("Half-close failed: {}", e);
    }
    Ok(total)
}
