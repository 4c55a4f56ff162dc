//! Listener orchestration and admission control
//!
//! One accept loop per transport (plain TCP, TLS, Marti HTTP), all gated by
//! the same admission policy: at `max_clients` the loop pauses and lets the
//! kernel backlog absorb bursts, and a single IP cannot hold more than its
//! share of registry slots. TLS handshakes run inside the per-connection
//! task, never in the accept loop.

use crate::client::ClientConnection;
use crate::config::ServerConfig;
use crate::error::{HandshakeError, Result, ServerError};
use crate::marti;
use crate::router::CotRouter;
use crate::tls;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{timeout, Instant};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause before re-checking capacity when the registry is full.
const CAPACITY_PAUSE: Duration = Duration::from_secs(1);

/// Pause after a transient accept error.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Window granted to live connections between "stop accepting" and forced
/// close during shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Interval of the periodic status log line.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// A `max_clients` slot, reserved in the accept loop before the connection
/// task spawns and released when the task exits. Every registered client is
/// inside a live slot, so `registry.len()` can never exceed the reservation
/// count even while handshakes are still in flight.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn reserve(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: active.clone(),
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The broker process: router, listeners, and shutdown plumbing.
pub struct TakServer {
    config: Arc<ServerConfig>,
    router: Arc<CotRouter>,
    /// Connections between accept and task exit, registered or not.
    active_connections: Arc<AtomicUsize>,
    /// Stops accept loops and the Marti service.
    accept_cancel: CancellationToken,
    /// Stops live connections; tripped after the drain window.
    conn_cancel: CancellationToken,
    tcp_addr: Option<SocketAddr>,
    tls_addr: Option<SocketAddr>,
    marti_addr: Option<SocketAddr>,
}

impl TakServer {
    pub fn new(config: ServerConfig) -> Self {
        let router = Arc::new(CotRouter::new(config.outbound_queue_capacity));
        Self {
            config: Arc::new(config),
            router,
            active_connections: Arc::new(AtomicUsize::new(0)),
            accept_cancel: CancellationToken::new(),
            conn_cancel: CancellationToken::new(),
            tcp_addr: None,
            tls_addr: None,
            marti_addr: None,
        }
    }

    pub fn router(&self) -> Arc<CotRouter> {
        self.router.clone()
    }

    /// Bound address of the plain-TCP listener, once started.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    pub fn marti_addr(&self) -> Option<SocketAddr> {
        self.marti_addr
    }

    /// Bind every configured listener and spawn its loop. Fatal bind and
    /// TLS-material errors surface here; afterwards the server runs until
    /// [`shutdown`](Self::shutdown).
    pub async fn start(&mut self) -> Result<()> {
        let tcp_listener = bind(self.config.tcp_port).await?;
        let tcp_addr = tcp_listener.local_addr()?;
        info!(addr = %tcp_addr, "CoT TCP listener bound");
        self.tcp_addr = Some(tcp_addr);

        let tls_listener = match (self.config.effective_tls_port(), self.config.tls.as_ref()) {
            (Some(port), Some(tls_config)) => {
                let acceptor = tls::build_acceptor(tls_config)?;
                let listener = bind(port).await?;
                let tls_addr = listener.local_addr()?;
                info!(
                    addr = %tls_addr,
                    client_auth = tls_config.require_client_cert,
                    "CoT TLS listener bound"
                );
                self.tls_addr = Some(tls_addr);
                Some((listener, acceptor))
            }
            _ => None,
        };

        if let Some(port) = self.config.marti_port {
            let listener = bind(port).await?;
            let marti_addr = listener.local_addr()?;
            info!(addr = %marti_addr, "Marti API listener bound");
            self.marti_addr = Some(marti_addr);
            tokio::spawn(marti::serve(
                listener,
                self.router.clone(),
                self.config.clone(),
                self.accept_cancel.clone(),
            ));
        }

        tokio::spawn(accept_loop(
            tcp_listener,
            None,
            self.router.clone(),
            self.config.clone(),
            self.active_connections.clone(),
            self.accept_cancel.clone(),
            self.conn_cancel.clone(),
        ));
        if let Some((listener, acceptor)) = tls_listener {
            tokio::spawn(accept_loop(
                listener,
                Some(acceptor),
                self.router.clone(),
                self.config.clone(),
                self.active_connections.clone(),
                self.accept_cancel.clone(),
                self.conn_cancel.clone(),
            ));
        }
        tokio::spawn(status_loop(
            self.router.clone(),
            self.accept_cancel.clone(),
        ));

        Ok(())
    }

    /// Stop accepting, give live connections the drain window, then force
    /// the rest closed.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.accept_cancel.cancel();

        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        while self.router.client_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.conn_cancel.cancel();

        // Let the connection tasks observe the trip and unregister.
        let deadline = Instant::now() + Duration::from_millis(500);
        while self.router.client_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("shutdown complete");
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Accept connections on one transport. `acceptor` is present for the TLS
/// listener; the handshake itself runs inside the spawned connection task.
async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    router: Arc<CotRouter>,
    config: Arc<ServerConfig>,
    active: Arc<AtomicUsize>,
    accept_cancel: CancellationToken,
    conn_cancel: CancellationToken,
) {
    loop {
        // Gate on reservations, not registrations: slots are taken before
        // the connection task spawns, so a burst of accepts cannot push the
        // registry past the ceiling while handshakes are still pending.
        if active.load(Ordering::SeqCst) >= config.max_clients {
            debug!("registry at capacity, pausing accepts");
            tokio::select! {
                _ = accept_cancel.cancelled() => return,
                _ = tokio::time::sleep(CAPACITY_PAUSE) => continue,
            }
        }

        let (stream, peer_addr) = tokio::select! {
            _ = accept_cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(reason = %e, "accept error");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    continue;
                }
            },
        };

        if config.max_clients_per_ip > 0
            && router.clients_from_ip(peer_addr.ip()) >= config.max_clients_per_ip
        {
            debug!(addr = %peer_addr, "per-IP connection limit reached, dropping");
            continue;
        }

        let _ = stream.set_nodelay(true);

        let slot = ConnectionSlot::reserve(&active);
        let acceptor = acceptor.clone();
        let router = router.clone();
        let config = config.clone();
        let cancel = conn_cancel.child_token();
        tokio::spawn(async move {
            let _slot = slot;
            match acceptor {
                None => {
                    ClientConnection::new(peer_addr, None, router, config, cancel)
                        .run(stream)
                        .await;
                }
                Some(acceptor) => {
                    let handshake = timeout(config.handshake_timeout(), acceptor.accept(stream));
                    match handshake.await {
                        Err(_) => {
                            warn!(addr = %peer_addr, reason = %HandshakeError::Timeout, "TLS handshake failed");
                        }
                        Ok(Err(e)) => {
                            let reason = tls::classify_handshake_error(&e);
                            warn!(addr = %peer_addr, reason = %reason, "TLS handshake failed");
                        }
                        Ok(Ok(tls_stream)) => {
                            let subject = tls::peer_subject(tls_stream.get_ref().1);
                            if let Some(subject) = &subject {
                                info!(addr = %peer_addr, subject = %subject, "client certificate verified");
                            }
                            ClientConnection::new(peer_addr, subject, router, config, cancel)
                                .run(tls_stream)
                                .await;
                        }
                    }
                }
            }
        });
    }
}

async fn status_loop(router: Arc<CotRouter>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                let metrics = router.metrics();
                info!(
                    clients = metrics.client_count,
                    routed = metrics.events_routed,
                    dropped = metrics.events_dropped,
                    "status"
                );
            }
        }
    }
}
