//! One relayed connection: the accepted client socket, the dialed backend
//! socket, and the pump that moves bytes between them.
//!
//! The pump works in iterations. Each iteration drains everything currently
//! readable from the client into the backend, then everything currently
//! readable from the backend into the client. Reads and writes never block:
//! a destination that stops accepting bytes only pauses its own direction.
//! When an iteration moves nothing the relay waits for a socket to become
//! ready, bounded by the poll interval and the idle deadline, and then
//! re-checks its termination conditions.
//!
//! End of stream is propagated per direction. Once a source reports EOF and
//! its pending bytes are flushed, the write half of the opposite socket is
//! shut down while the other direction keeps flowing. The relay ends when
//! both directions are finished.

use super::idle::IdleTracker;
use super::rewrite::HostRewriter;
use super::types::{CloseReason, DialError, RelayState, RelaySummary};
use crate::config::RelayConfig;
use socket2::SockRef;
use std::borrow::Cow;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Owns both sockets of a relayed connection for its whole lifetime.
pub struct ConnectionRelay {
    client: TcpStream,
    backend: TcpStream,
    peer: SocketAddr,
    rewriter: Option<HostRewriter>,
    idle: IdleTracker,
    poll_interval: Duration,
    /// Read buffer shared by both directions.
    scratch: Vec<u8>,
    /// Client -> backend.
    upstream: Pipe,
    /// Backend -> client.
    downstream: Pipe,
    stop: CancellationToken,
    state: RelayState,
    /// Which peer sent EOF first, once one has.
    first_closed: Option<Side>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Backend,
}

/// One direction of a relay.
#[derive(Debug, Default)]
struct Pipe {
    /// Bytes read from the source (after any rewrite) not yet fully written.
    pending: Vec<u8>,
    /// How much of `pending` has been written.
    flushed: usize,
    /// The source reported end of stream.
    eof: bool,
    /// EOF has been passed on by shutting down the destination's write half.
    finished: bool,
    /// Total bytes written to the destination.
    written: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    read: u64,
    written: u64,
}

impl Progress {
    fn moved(&self) -> bool {
        self.read > 0 || self.written > 0
    }
}

impl Pipe {
    fn has_pending(&self) -> bool {
        self.flushed < self.pending.len()
    }

    fn can_read(&self) -> bool {
        !self.eof && !self.has_pending()
    }

    /// Shut down `dst`'s write half once the source is at EOF and everything
    /// read from it has been written. Returns true on the call that does so.
    fn finish(&mut self, dst: &TcpStream) -> bool {
        if self.finished || !self.eof || self.has_pending() {
            return false;
        }
        self.finished = true;
        // The peer may already be gone; the other direction reports that.
        if let Err(e) = SockRef::from(dst).shutdown(Shutdown::Write) {
            trace!("Write shutdown failed: {}", e);
        }
        true
    }

    /// Move bytes from `src` to `dst` until `src` has nothing more to read
    /// right now, `dst` stops accepting, or `src` reaches end of stream.
    fn transfer(
        &mut self,
        src: &TcpStream,
        dst: &TcpStream,
        scratch: &mut [u8],
        rewriter: Option<&HostRewriter>,
    ) -> io::Result<Progress> {
        let mut progress = Progress::default();
        loop {
            while self.has_pending() {
                match dst.try_write(&self.pending[self.flushed..]) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        self.flushed += n;
                        self.written += n as u64;
                        progress.written += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progress),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            if self.eof {
                return Ok(progress);
            }

            let n = match src.try_read(scratch) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(progress);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progress),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            progress.read += n as u64;

            let chunk = &scratch[..n];
            self.pending.clear();
            self.flushed = 0;
            match rewriter.map(|rewriter| rewriter.rewrite(chunk)) {
                Some(Cow::Owned(rewritten)) => {
                    trace!("Rewrote Host header ({} -> {} bytes)", n, rewritten.len());
                    self.pending = rewritten;
                }
                _ => self.pending.extend_from_slice(chunk),
            }
        }
    }
}

impl ConnectionRelay {
    /// Dial `127.0.0.1:<internal_port>` for an accepted client.
    ///
    /// On failure the client socket is dropped, which closes it.
    pub async fn connect(
        client: TcpStream,
        peer: SocketAddr,
        config: &RelayConfig,
        stop: CancellationToken,
    ) -> Result<Self, DialError> {
        let port = config.internal_port;
        let backend_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        trace!("Relay {} {:?}: dialing {}", peer, RelayState::Connecting, backend_addr);

        let dial = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(backend_addr));
        let backend = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                return Err(DialError {
                    port,
                    source: io::Error::new(io::ErrorKind::Interrupted, "listener stopped"),
                });
            }
            result = dial => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(DialError { port, source }),
                Err(_) => {
                    return Err(DialError {
                        port,
                        source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                    });
                }
            },
        };

        // Small request/response exchanges should not wait on Nagle.
        let _ = client.set_nodelay(true);
        let _ = backend.set_nodelay(true);

        Ok(Self {
            client,
            backend,
            peer,
            rewriter: config
                .rewrite_host_header
                .then(|| HostRewriter::new(port)),
            idle: IdleTracker::new(config.idle_timeout()),
            poll_interval: config.poll_interval(),
            scratch: vec![0u8; config.buffer_size.max(1)],
            upstream: Pipe::default(),
            downstream: Pipe::default(),
            stop,
            state: RelayState::Connecting,
            first_closed: None,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Pump bytes until the listener stops, a peer closes, an error occurs or
    /// the connection idles out. Both sockets are released on return.
    pub async fn run(mut self) -> RelaySummary {
        let started = Instant::now();
        // The idle clock starts when pumping starts, not when the dial began.
        self.idle.touch();
        self.transition(RelayState::Relaying);

        let stop = self.stop.clone();
        let reason = tokio::select! {
            biased;
            _ = stop.cancelled() => CloseReason::Stopped,
            reason = self.pump() => reason,
        };

        self.transition(RelayState::Closing);
        self.close().await;
        self.transition(RelayState::Closed);

        let summary = RelaySummary {
            peer: self.peer,
            reason,
            bytes_to_backend: self.upstream.written,
            bytes_to_client: self.downstream.written,
            duration: started.elapsed(),
        };
        if summary.reason.is_error() {
            warn!(
                "Relay {} failed after {:?}: {} ({} bytes to backend, {} bytes to client)",
                summary.peer,
                summary.duration,
                summary.reason,
                summary.bytes_to_backend,
                summary.bytes_to_client
            );
        } else {
            debug!(
                "Relay {} closed after {:?}: {} ({} bytes to backend, {} bytes to client)",
                summary.peer,
                summary.duration,
                summary.reason,
                summary.bytes_to_backend,
                summary.bytes_to_client
            );
        }
        summary
    }

    async fn pump(&mut self) -> CloseReason {
        loop {
            let upstream = match self.upstream.transfer(
                &self.client,
                &self.backend,
                &mut self.scratch,
                self.rewriter.as_ref(),
            ) {
                Ok(progress) => progress,
                Err(e) => return CloseReason::Io(e),
            };
            let downstream = match self.downstream.transfer(
                &self.backend,
                &self.client,
                &mut self.scratch,
                None,
            ) {
                Ok(progress) => progress,
                Err(e) => return CloseReason::Io(e),
            };

            let moved = upstream.moved() || downstream.moved();
            if moved {
                self.idle.touch();
            }

            if self.upstream.finish(&self.backend) {
                self.half_closed(Side::Client);
            }
            if self.downstream.finish(&self.client) {
                self.half_closed(Side::Backend);
            }
            if self.upstream.finished && self.downstream.finished {
                return match self.first_closed {
                    Some(Side::Backend) => CloseReason::BackendClosed,
                    _ => CloseReason::ClientClosed,
                };
            }
            if moved {
                continue;
            }
            if self.idle.is_expired() {
                debug!(
                    "Relay {} idle for {:?} (limit {:?})",
                    self.peer,
                    self.idle.idle_for(),
                    self.idle.timeout()
                );
                return CloseReason::IdleTimeout;
            }

            let nap = self.poll_interval.min(self.idle.remaining());
            tokio::select! {
                _ = self.client.readable(), if self.upstream.can_read() => {}
                _ = self.backend.writable(), if self.upstream.has_pending() => {}
                _ = self.backend.readable(), if self.downstream.can_read() => {}
                _ = self.client.writable(), if self.downstream.has_pending() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    fn half_closed(&mut self, side: Side) {
        trace!("Relay {} half-closed by {:?}", self.peer, side);
        self.first_closed.get_or_insert(side);
    }

    /// Best-effort shutdown of both write halves. Errors on an already broken
    /// socket are expected and ignored; the sockets close when dropped.
    async fn close(&mut self) {
        let _ = self.client.shutdown().await;
        let _ = self.backend.shutdown().await;
    }

    fn transition(&mut self, next: RelayState) {
        trace!("Relay {} {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }
}
