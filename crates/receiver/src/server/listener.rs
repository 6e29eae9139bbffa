//! TLS accept loop, live-connection registry and coordinated shutdown.
//!
//! Accepts and handshakes are serialized: one TLS negotiation finishes (or
//! fails and is discarded) before the next `accept` is issued. Each accepted
//! connection then runs on its own Tokio task. Only this loop touches the
//! registry, so it needs no locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::connection::{CloseReason, Connection};
use super::processor::Processor;
use super::tls;
use crate::config::ServerConfig;
use crate::error::{HandshakeError, ServerError};

/// Pause after a failed TCP accept so fd exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Cloneable trigger for a whole-server shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(CancellationToken);

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.0.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A handshaken connection plus the peer it came from.
struct Accepted {
    stream: TlsStream<TcpStream>,
    peer: String,
}

/// Bound TLS listener.
///
/// Dropping a `Listener` without running it to completion still signals
/// every spawned connection to shut down.
pub struct Listener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
    idle_timeout: Duration,
    handshake_timeout: Duration,
    shutdown: CancellationToken,
    workers: HashMap<Uuid, JoinHandle<CloseReason>>,
}

impl Listener {
    /// Validate `config`, build the TLS context and bind the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for missing TLS material or an unusable
    /// verification policy, and [`ServerError::Bind`] if the bind fails.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let acceptor = tls::build_acceptor(&config)?;

        let bind_err = |source| ServerError::Bind {
            addr: format!("{}:{}", config.address, config.port),
            source,
        };
        let tcp = TcpListener::bind((config.address.as_str(), config.port))
            .await
            .map_err(bind_err)?;
        let local_addr = tcp.local_addr().map_err(bind_err)?;

        info!(
            addr = %local_addr,
            verify_peer = config.verify_peer,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "listener bound"
        );

        Ok(Self {
            tcp,
            acceptor,
            local_addr,
            idle_timeout: config.idle_timeout,
            handshake_timeout: config.handshake_timeout,
            shutdown: CancellationToken::new(),
            workers: HashMap::new(),
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port; differs from the configured one when that was `0`.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Accept connections until shutdown is triggered, handing every frame
    /// to `processor`.
    ///
    /// On the way out every live connection is signalled first and joined
    /// second, then the listening socket is closed.
    pub async fn run<P: Processor>(mut self, processor: Arc<P>) {
        self.accept_loop(&processor).await;
        self.shutdown_connections().await;
        info!(addr = %self.local_addr, "listener closed");
        // Dropping `self` closes the listening socket.
    }

    async fn accept_loop<P: Processor>(&mut self, processor: &Arc<P>) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                accepted = self.accept() => accepted,
            };

            match accepted {
                Ok(accepted) => self.spawn_connection(accepted, processor),
                Err(e @ HandshakeError::Accept(_)) => {
                    warn!(peer = e.peer(), error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
                Err(e) => {
                    warn!(
                        peer = e.peer(),
                        error = %e,
                        "TLS handshake failed, discarding connection"
                    );
                }
            }
        }
    }

    /// Accept one TCP connection and complete its TLS handshake.
    ///
    /// The peer is returned with the stream so failures can be attributed.
    async fn accept(&self) -> Result<Accepted, HandshakeError> {
        let (tcp, addr) = self.tcp.accept().await.map_err(HandshakeError::Accept)?;
        let peer = addr.to_string();
        debug!(%peer, "accepted TCP connection");

        match tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(tcp)).await {
            Ok(Ok(stream)) => Ok(Accepted { stream, peer }),
            Ok(Err(source)) => Err(HandshakeError::Tls { peer, source }),
            Err(_) => Err(HandshakeError::Timeout {
                peer,
                timeout: self.handshake_timeout,
            }),
        }
    }

    fn spawn_connection<P: Processor>(&mut self, accepted: Accepted, processor: &Arc<P>) {
        self.workers.retain(|_, handle| !handle.is_finished());

        let id = Uuid::new_v4();
        let span = info_span!("connection", %id, peer = %accepted.peer);
        let connection = Connection::new(
            accepted.stream,
            accepted.peer,
            self.idle_timeout,
            self.shutdown.child_token(),
        );
        let handle = tokio::spawn(connection.run(Arc::clone(processor)).instrument(span));
        self.workers.insert(id, handle);
        debug!(connection = %id, live = self.workers.len(), "connection registered");
    }

    async fn shutdown_connections(&mut self) {
        // Signal everyone before joining anyone.
        self.shutdown.cancel();

        let workers = std::mem::take(&mut self.workers);
        info!(connections = workers.len(), "waiting for connections to close");
        for (id, handle) in workers {
            if let Err(e) = handle.await {
                warn!(connection = %id, error = %e, "connection task failed");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}
