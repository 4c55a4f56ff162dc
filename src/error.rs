//! Broker error taxonomy
//!
//! Fatal errors (`Config`, `Bind`, `TlsMaterial`) bubble out of startup
//! only; everything else is confined to a single connection's tasks.

use crate::router::ClientId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid or unloadable configuration. Exit code 64.
    #[error("configuration error: {0}")]
    Config(String),

    /// A listener could not bind its port. Exit code 74.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// TLS certificate chain, key, or trust roots could not be loaded. Exit code 77.
    #[error("TLS material: {0}")]
    TlsMaterial(String),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Peer fell behind its bounded outbound queue past the drop threshold.
    /// Never surfaced to other connections.
    #[error("slow consumer")]
    SlowConsumer,

    /// Registry at `max_clients`. Accept loops pause; peers only ever see
    /// TCP backlog delay.
    #[error("server at capacity")]
    Overloaded,

    /// Registering a ClientId that is already present. Programmer error;
    /// the existing registration is left untouched.
    #[error("client {0} already registered")]
    DuplicateClient(ClientId),
}

/// Per-connection TLS handshake failures. The connection is closed and no
/// ClientId is consumed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake timeout")]
    Timeout,

    #[error("client certificate not trusted")]
    UntrustedClientCert,

    #[error("client certificate expired")]
    CertificateExpired,

    #[error("protocol failure: {0}")]
    Protocol(String),
}

/// Per-connection framing failures. The connection is closed and the peer
/// unregistered; other connections are unaffected.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("oversized event: {size} bytes exceeds limit of {limit}")]
    OversizedEvent { size: usize, limit: usize },

    #[error("truncated event: stream ended inside an event document")]
    TruncatedEvent,

    #[error("malformed XML: {0}")]
    MalformedXml(&'static str),
}

impl ServerError {
    /// Process exit code for startup failures: 64 configuration, 74 bind,
    /// 77 TLS material. Everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config(_) => 64,
            ServerError::Bind { .. } => 74,
            ServerError::TlsMaterial(_) => 77,
            _ => 1,
        }
    }
}
