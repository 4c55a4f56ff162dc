//! # OmniTAK Server
//!
//! A lightweight TAK-compatible Cursor-on-Target message broker.
//!
//! Clients connect over plain TCP or TLS (optionally mutual TLS), stream
//! `<event>` XML documents, and every framed event is fanned out to every
//! other connected client. A small read-only Marti HTTP surface reports
//! server metadata. The broker is stateless: nothing survives a restart,
//! and event content is never interpreted.
//!
//! Resource use is bounded end to end: a fixed client ceiling with per-IP
//! limits at the accept loops, a bounded outbound queue per peer with a
//! slow-consumer disconnect policy, and hard size limits on framed events.

pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod marti;
pub mod router;
pub mod server;
pub mod tls;

pub use config::{ServerConfig, TlsConfig};
pub use error::{FramingError, HandshakeError, Result, ServerError};
pub use framer::CotFramer;
pub use router::{ClientId, CotEvent, CotRouter};
pub use server::TakServer;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default CoT stream port (plain TCP)
pub const DEFAULT_TCP_PORT: u16 = 8087;

/// Default CoT stream port (TLS)
pub const DEFAULT_TLS_PORT: u16 = 8089;

/// Default Marti API port
pub const DEFAULT_MARTI_PORT: u16 = 8443;

/// Hostname reported by the Marti version endpoint when `$HOSTNAME` is unset
pub const FALLBACK_HOSTNAME: &str = "omnitak-server";
