//! Per-connection handler
//!
//! One logical task per accepted socket, split into a reader half (frames
//! inbound bytes and routes them) and a writer half (drains the outbound
//! queue to the socket). The halves share a cancellation token: when either
//! terminates the other unwinds at its next suspension point, then the
//! connection unregisters and the socket closes. Errors never leave the
//! connection's tasks.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::framer::CotFramer;
use crate::router::{ClientId, CotEvent, CotRouter};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inbound read buffer size. Events span reads, so this bounds only the
/// per-read copy, not the event size.
const READ_BUF_BYTES: usize = 8 * 1024;

/// A single accepted connection, plain TCP or TLS.
pub struct ClientConnection {
    addr: SocketAddr,
    /// End-entity subject DN of the peer certificate, mTLS only.
    peer_subject: Option<String>,
    router: Arc<CotRouter>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
}

impl ClientConnection {
    pub fn new(
        addr: SocketAddr,
        peer_subject: Option<String>,
        router: Arc<CotRouter>,
        config: Arc<ServerConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            peer_subject,
            router,
            config,
            cancel,
        }
    }

    /// Drive the connection until either half terminates, then unregister.
    pub async fn run<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.router.allocate_id();
        let outbound = match self
            .router
            .register(id, self.addr, self.peer_subject.clone(), self.cancel.clone())
        {
            Ok(outbound) => outbound,
            // Do not unregister here: that would tear down whatever live
            // registration this id collided with.
            Err(e) => {
                error!(client = %id, reason = %e, "registration rejected");
                return;
            }
        };
        info!(client = %id, addr = %self.addr, "client connected");

        let (read_half, write_half) = tokio::io::split(stream);

        let writer_cancel = self.cancel.clone();
        let writer_config = self.config.clone();
        let writer = tokio::spawn(async move {
            let result = write_loop(write_half, outbound, &writer_config, &writer_cancel).await;
            writer_cancel.cancel();
            result
        });

        let read_result = read_loop(read_half, id, &self.router, &self.config, &self.cancel).await;
        self.cancel.cancel();
        let write_result = writer.await;

        self.router.unregister(id);

        if let Err(e) = read_result {
            warn!(client = %id, reason = %e, "connection closed");
        }
        match write_result {
            Ok(Err(e)) => debug!(client = %id, reason = %e, "writer terminated"),
            Err(e) => warn!(client = %id, reason = %e, "writer task failed"),
            Ok(Ok(())) => {}
        }
        info!(client = %id, addr = %self.addr, "client disconnected");
    }
}

/// Read bytes, frame events, route them. Terminates on EOF, idle timeout,
/// framing or I/O error, or cancellation.
async fn read_loop<R>(
    mut reader: R,
    id: ClientId,
    router: &CotRouter,
    config: &ServerConfig,
    cancel: &CancellationToken,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut framer = CotFramer::new(config.min_event_bytes, config.max_event_bytes);
    let mut buf = [0u8; READ_BUF_BYTES];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = timeout(config.idle_timeout(), reader.read(&mut buf)) => read,
        };
        let n = match read {
            Err(_) => {
                info!(client = %id, "idle timeout, closing");
                return Ok(());
            }
            Ok(Ok(0)) => {
                framer.finish()?;
                return Ok(());
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
        };
        framer.extend(&buf[..n]);
        while let Some(doc) = framer.next_event()? {
            router.route(id, CotEvent::new(doc));
        }
    }
}

/// Drain the outbound queue to the socket. Terminates on queue
/// end-of-stream (unregistered), write error or timeout, or cancellation.
async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<CotEvent>,
    config: &ServerConfig,
    cancel: &CancellationToken,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = outbound.recv() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };
        let write = async {
            writer.write_all(event.as_bytes()).await?;
            writer.flush().await
        };
        let written = tokio::select! {
            // The connection may be condemned while a write is stalled on a
            // full socket; the token must still end it promptly.
            _ = cancel.cancelled() => return Ok(()),
            written = timeout(config.write_timeout(), write) => written,
        };
        match written {
            // A write that cannot complete within the window is the same
            // backpressure signal as a full queue.
            Err(_) => return Err(ServerError::SlowConsumer),
            Ok(Err(e)) => {
                if e.kind() == io::ErrorKind::BrokenPipe
                    || e.kind() == io::ErrorKind::ConnectionReset
                {
                    return Ok(());
                }
                return Err(e.into());
            }
            Ok(Ok(())) => {}
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
