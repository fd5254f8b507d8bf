//! State, outcome and error types for the relay engine.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Lifecycle of one relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Backend dial in progress.
    Connecting,
    /// Bytes are being pumped in both directions.
    Relaying,
    /// A termination condition fired; sockets not yet released.
    Closing,
    /// Both sockets released. Terminal.
    Closed,
}

/// Lifecycle of a relay listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Listening,
    /// Terminal: a new listener must be constructed to listen again.
    Stopped,
}

/// Why a relay finished.
#[derive(Debug)]
pub enum CloseReason {
    /// The listener was stopped.
    Stopped,
    /// The client closed its side of the connection.
    ClientClosed,
    /// The backend closed its side of the connection.
    BackendClosed,
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
    /// A read or write failed.
    Io(io::Error),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Io(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => write!(f, "listener stopped"),
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::BackendClosed => write!(f, "backend closed"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// What a finished relay did.
#[derive(Debug)]
pub struct RelaySummary {
    pub peer: SocketAddr,
    pub reason: CloseReason,
    /// Bytes written to the backend, after any header rewrite.
    pub bytes_to_backend: u64,
    /// Bytes written to the client.
    pub bytes_to_client: u64,
    pub duration: Duration,
}

/// The listening socket could not be set up. Reported synchronously by `start`.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Port {0} is outside the permitted range")]
    InvalidPort(u16),
    #[error("Port {0} is already in use")]
    AddrInUse(u16),
    #[error("Failed to bind port {port}: {source}")]
    Io {
        port: u16,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    pub(crate) fn from_io(port: u16, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            BindError::AddrInUse(port)
        } else {
            BindError::Io { port, source }
        }
    }
}

/// The backend could not be reached for one accepted connection.
#[derive(Debug, thiserror::Error)]
#[error("Failed to connect to backend 127.0.0.1:{port}: {source}")]
pub struct DialError {
    pub port: u16,
    #[source]
    pub source: io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_maps_addr_in_use() {
        let err = BindError::from_io(5000, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, BindError::AddrInUse(5000)));
        assert_eq!(err.to_string(), "Port 5000 is already in use");
    }

    #[test]
    fn test_bind_error_keeps_other_io_errors() {
        let err = BindError::from_io(80, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, BindError::Io { port: 80, .. }));
        assert!(err.to_string().starts_with("Failed to bind port 80"));
    }

    #[test]
    fn test_dial_error_message() {
        let err = DialError {
            port: 8080,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err
            .to_string()
            .starts_with("Failed to connect to backend 127.0.0.1:8080"));
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::IdleTimeout.to_string(), "idle timeout");
        assert_eq!(CloseReason::Stopped.to_string(), "listener stopped");
        let io_reason = CloseReason::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(io_reason.is_error());
        assert!(!CloseReason::ClientClosed.is_error());
    }
}
