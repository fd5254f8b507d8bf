//! RelayListener: binds the external port and dispatches one relay per
//! accepted connection.

use super::connection::ConnectionRelay;
use super::network::create_listener;
use super::types::{BindError, ListenerState};
use crate::config::RelayConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A relay listener that has not been started yet.
#[derive(Debug, Clone)]
pub struct RelayListener {
    config: RelayConfig,
}

impl RelayListener {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::Created
    }

    /// Bind `0.0.0.0:<external_port>` and start accepting in the background.
    ///
    /// Bind failures are returned here, before any task is spawned. Must be
    /// called from within a tokio runtime.
    pub fn start(self) -> Result<RelayHandle, BindError> {
        let port = self.config.external_port;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = create_listener(addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(port, e))?;

        info!(
            "Relaying {} -> 127.0.0.1:{} (host header rewrite: {})",
            local_addr,
            self.config.internal_port,
            if self.config.rewrite_host_header { "on" } else { "off" }
        );

        let config = Arc::new(self.config);
        let stop = CancellationToken::new();
        let relays = TaskTracker::new();

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&config),
            stop.clone(),
            relays.clone(),
        ));

        Ok(RelayHandle {
            config,
            local_addr,
            stop,
            relays,
        })
    }
}

/// Control handle for a started listener.
///
/// Dropping the handle stops the listener.
#[derive(Debug)]
pub struct RelayHandle {
    config: Arc<RelayConfig>,
    local_addr: SocketAddr,
    stop: CancellationToken,
    relays: TaskTracker,
}

impl RelayHandle {
    /// Stop accepting and signal every active relay to close.
    ///
    /// Calling this more than once is a no-op. Relays observe the signal at
    /// their next await point rather than being aborted.
    pub fn stop(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        info!("Stopping relay on port {}", self.local_addr.port());
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn state(&self) -> ListenerState {
        if self.is_stopped() {
            ListenerState::Stopped
        } else {
            ListenerState::Listening
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of relays currently running.
    pub fn active_relays(&self) -> usize {
        self.relays.len()
    }

    /// Resolve once the accept loop has exited and every relay has finished.
    ///
    /// Never resolves unless [`stop`](Self::stop) is called.
    pub async fn wait(&self) {
        self.relays.wait().await;
    }

    /// Stop, then wait up to `grace` for relays to finish.
    ///
    /// Returns false if some relays were still running when `grace` elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        tokio::time::timeout(grace, self.wait()).await.is_ok()
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<RelayConfig>,
    stop: CancellationToken,
    relays: TaskTracker,
) {
    let port = config.external_port;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                debug!("Accept loop on port {} stopping", port);
                break;
            }

            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {} on port {}", peer, port);
                    let config = Arc::clone(&config);
                    let stop = stop.clone();
                    relays.spawn(serve_connection(stream, peer, config, stop));
                }
                Err(e) => {
                    error!("Accept error on port {}: {}", port, e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    // Closing the socket here is what frees the port.
    drop(listener);
    relays.close();
    info!("Listener on port {} stopped", port);
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<RelayConfig>,
    stop: CancellationToken,
) {
    match ConnectionRelay::connect(stream, peer, &config, stop.clone()).await {
        Ok(relay) => {
            relay.run().await;
        }
        Err(e) if stop.is_cancelled() => {
            debug!("Dropping connection from {}: {}", peer, e);
        }
        Err(e) => {
            warn!("Dropping connection from {}: {}", peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_start_reports_listening() {
        let listener = RelayListener::new(RelayConfig::new(free_port(), free_port(), false));
        assert_eq!(listener.state(), ListenerState::Created);

        let handle = listener.start().unwrap();
        assert_eq!(handle.state(), ListenerState::Listening);
        assert_eq!(handle.active_relays(), 0);
        assert!(handle.local_addr().ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let handle = RelayListener::new(RelayConfig::new(free_port(), free_port(), false))
            .start()
            .unwrap();
        handle.stop();
        handle.stop();
        assert_eq!(handle.state(), ListenerState::Stopped);
        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_port_freed_after_stop() {
        let port = free_port();
        let handle = RelayListener::new(RelayConfig::new(port, free_port(), false))
            .start()
            .unwrap();
        assert!(handle.shutdown(Duration::from_secs(1)).await);

        // A fresh listener can take the same port once the old one is gone.
        let again = RelayListener::new(RelayConfig::new(port, free_port(), false)).start();
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = RelayListener::new(RelayConfig::new(port, free_port(), false))
            .start()
            .unwrap_err();
        assert!(matches!(err, BindError::AddrInUse(p) if p == port));
    }

    #[tokio::test]
    async fn test_port_zero_is_rejected() {
        let err = RelayListener::new(RelayConfig::new(0, 8080, false))
            .start()
            .unwrap_err();
        assert!(matches!(err, BindError::InvalidPort(0)));
    }
}
