//! Server configuration
//!
//! A single immutable record constructed once at startup (file and/or CLI)
//! and shared by reference. All limits are explicit so resource use stays
//! bounded under adversarial load.

use crate::error::{Result, ServerError};
use crate::{DEFAULT_MARTI_PORT, DEFAULT_TCP_PORT, DEFAULT_TLS_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Maximum concurrently registered clients. The accept loops pause once the
/// registry reaches this ceiling; the kernel backlog absorbs bursts.
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Max registered connections from a single IP address. Prevents one host
/// from consuming the whole registry. 0 disables the check.
pub const DEFAULT_MAX_CLIENTS_PER_IP: usize = 16;

/// Per-peer outbound queue capacity, in events. A full queue triggers the
/// slow-consumer policy rather than growing.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Seconds without inbound bytes before a connection is dropped.
pub const DEFAULT_CLIENT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Seconds allowed for the TLS handshake before the socket is closed.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Seconds allowed for a single outbound write. A timed-out write counts as
/// a slow-consumer event.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

/// Smallest byte length accepted for a framed event document. Anything
/// shorter cannot be a real CoT event.
pub const DEFAULT_MIN_EVENT_BYTES: usize = 32;

/// Largest byte length accepted for a framed event document.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 64 * 1024;

// =============================================================================
// CONFIG RECORD
// =============================================================================

/// TLS listener material. `cert` and `key` are required; `trust_roots`
/// plus `require_client_cert` enable mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file with the server certificate chain, leaf first.
    pub cert: PathBuf,
    /// PEM file with the server private key (PKCS#8, PKCS#1, or SEC1).
    pub key: PathBuf,
    /// PEM file with trusted CA certificates for client verification.
    #[serde(default)]
    pub trust_roots: Option<PathBuf>,
    /// Require and verify a client certificate chain against `trust_roots`.
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Process-wide broker configuration, immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Plain-TCP CoT stream port.
    pub tcp_port: u16,
    /// TLS CoT stream port. The TLS listener only runs when `tls` is set.
    pub tls_port: Option<u16>,
    /// Marti HTTP port. `None` disables the HTTP surface.
    pub marti_port: Option<u16>,
    pub max_clients: usize,
    pub max_clients_per_ip: usize,
    pub client_idle_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub outbound_queue_capacity: usize,
    pub min_event_bytes: usize,
    pub max_event_bytes: usize,
    pub tls: Option<TlsConfig>,
    /// Raise the crate log directive to debug.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            tls_port: None,
            marti_port: Some(DEFAULT_MARTI_PORT),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_clients_per_ip: DEFAULT_MAX_CLIENTS_PER_IP,
            client_idle_timeout_secs: DEFAULT_CLIENT_IDLE_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            min_event_bytes: DEFAULT_MIN_EVENT_BYTES,
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            tls: None,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file. Unknown fields are rejected so typos fail
    /// loudly at startup instead of silently falling back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ServerConfig = serde_json::from_str(&content)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints. Called after file load and after CLI
    /// overrides are applied.
    pub fn validate(&self) -> Result<()> {
        if self.tcp_port == 0 {
            return Err(ServerError::Config("tcp_port must be non-zero".into()));
        }
        if self.max_clients == 0 {
            return Err(ServerError::Config("max_clients must be at least 1".into()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::Config(
                "outbound_queue_capacity must be at least 1".into(),
            ));
        }
        if self.min_event_bytes >= self.max_event_bytes {
            return Err(ServerError::Config(format!(
                "min_event_bytes ({}) must be below max_event_bytes ({})",
                self.min_event_bytes, self.max_event_bytes
            )));
        }
        if self.tls_port.is_some() && self.tls.is_none() {
            return Err(ServerError::Config(
                "tls_port set without TLS material".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.require_client_cert && tls.trust_roots.is_none() {
                return Err(ServerError::Config(
                    "require_client_cert set without trust_roots".into(),
                ));
            }
        }
        let mut ports = vec![("tcp_port", self.tcp_port)];
        if let Some(p) = self.effective_tls_port() {
            ports.push(("tls_port", p));
        }
        if let Some(p) = self.marti_port {
            ports.push(("marti_port", p));
        }
        for (i, (name_a, port_a)) in ports.iter().enumerate() {
            for (name_b, port_b) in &ports[i + 1..] {
                if port_a == port_b {
                    return Err(ServerError::Config(format!(
                        "{} and {} both set to {}",
                        name_a, name_b, port_a
                    )));
                }
            }
        }
        Ok(())
    }

    /// Port the TLS listener binds, or `None` when TLS is not configured.
    pub fn effective_tls_port(&self) -> Option<u16> {
        self.tls
            .as_ref()
            .map(|_| self.tls_port.unwrap_or(DEFAULT_TLS_PORT))
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn client_auth_required(&self) -> bool {
        self.tls
            .as_ref()
            .map(|t| t.require_client_cert)
            .unwrap_or(false)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

// =============================================================================
// TESTS
// =============================================================================
