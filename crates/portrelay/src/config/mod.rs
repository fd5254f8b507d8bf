//! Configuration types for portrelay.

mod settings;

use std::time::Duration;

pub use settings::{default_settings_path, Settings};

/// Lowest port the front-end accepts.
pub const MIN_PORT: u16 = 1;
/// Highest port the front-end accepts.
pub const MAX_PORT: u16 = u16::MAX;

/// Settings for one relay listener. Immutable once the listener is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Port accepted on `0.0.0.0`.
    pub external_port: u16,
    /// Loopback port of the backend every connection is forwarded to.
    pub internal_port: u16,
    /// Rewrite the `Host:` line of client requests to `localhost:<internal_port>`.
    pub rewrite_host_header: bool,
    /// Close a relay after this long with no bytes moved in either direction.
    pub idle_timeout_ms: u64,
    /// Longest a relay sleeps between checks when no socket is readable.
    pub poll_interval_ms: u64,
    /// Size of the per-relay copy buffer.
    pub buffer_size: usize,
    /// Give up dialing the backend after this long.
    pub connect_timeout_ms: u64,
}

const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

impl RelayConfig {
    pub fn new(external_port: u16, internal_port: u16, rewrite_host_header: bool) -> Self {
        Self {
            external_port,
            internal_port,
            rewrite_host_header,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_ms(interval);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Checks the front-end performs before starting a listener.
    ///
    /// The relay engine itself only rejects ports it cannot bind.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !is_valid_port(self.external_port) || !is_valid_port(self.internal_port) {
            anyhow::bail!(
                "Ports must be between {MIN_PORT}-{MAX_PORT} (got external {}, internal {})",
                self.external_port,
                self.internal_port
            );
        }
        if self.external_port == self.internal_port {
            anyhow::bail!(
                "External and internal ports must not be the same (both {})",
                self.external_port
            );
        }
        if self.buffer_size == 0 {
            anyhow::bail!("buffer_size must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Whether `port` is inside the range the front-end accepts.
pub fn is_valid_port(port: u16) -> bool {
    (MIN_PORT..=MAX_PORT).contains(&port)
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
