//! Relay engine.
//!
//! Accepts TCP connections on an external port and forwards each one to a
//! loopback backend port, optionally rewriting the HTTP `Host:` line on the
//! way in.
//!
//! # Module Structure
//!
//! - `listener` - RelayListener/RelayHandle and the accept loop
//! - `connection` - ConnectionRelay, the per-connection byte pump
//! - `rewrite` - Host header substitution on a single chunk
//! - `idle` - Idle tracking for a relay
//! - `network` - Listening socket creation
//! - `types` - States, close reasons and errors

mod connection;
mod idle;
mod listener;
mod network;
mod rewrite;
mod types;

pub use connection::ConnectionRelay;
pub use idle::IdleTracker;
pub use listener::{RelayHandle, RelayListener};
pub use rewrite::{rewrite_host_header, HostRewriter};
pub use types::{BindError, CloseReason, DialError, ListenerState, RelayState, RelaySummary};

use crate::config::RelayConfig;

/// Start relaying `0.0.0.0:<external_port>` to `127.0.0.1:<internal_port>`
/// with default timeouts.
pub fn start(
    external_port: u16,
    internal_port: u16,
    rewrite_host_header: bool,
) -> Result<RelayHandle, BindError> {
    RelayListener::new(RelayConfig::new(
        external_port,
        internal_port,
        rewrite_host_header,
    ))
    .start()
}
