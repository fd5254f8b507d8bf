//! Listening socket setup for the relay.
//!
//! The socket is built with socket2 so the backlog is explicit. SO_REUSEPORT
//! is not set, so a second listener on the same port fails to bind.

use super::types::BindError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

const LISTEN_BACKLOG: i32 = 1024;

/// Bind a non-blocking TCP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn create_listener(addr: SocketAddr) -> Result<TcpListener, BindError> {
    let port = addr.port();
    if port == 0 {
        return Err(BindError::InvalidPort(port));
    }
    bind(addr).map_err(|e| BindError::from_io(port, e))
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Lets a restarted relay rebind while old connections sit in TIME_WAIT.
    // Windows semantics differ (it allows hijacking a live port), so unix only.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
