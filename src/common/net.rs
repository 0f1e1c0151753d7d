//! Socket helpers shared by the listeners and the configuration

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use super::error::{ProxyError, Result};

/// Listen backlog for proxy listeners
pub const LISTEN_BACKLOG: i32 = 1024;

/// Parse a bind address such as `127.0.0.1:20104` or `localhost:8080`
///
/// Host names are resolved once and the first address wins.
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    addr.to_socket_addrs()
        .map_err(|e| ProxyError::Config(format!("Failed to parse address {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| ProxyError::Config(format!("Address {} resolved to nothing", addr)))
}

/// Create a non-blocking listening socket
///
/// SO_REUSEADDR lets a restarted proxy rebind while old connections sit in
/// TIME_WAIT. It does not allow two live listeners on the same port.
pub fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
