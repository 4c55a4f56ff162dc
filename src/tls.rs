//! TLS material loading and handshake plumbing
//!
//! Builds the rustls server configuration from PEM files at startup: server
//! chain + key always, client verification against configured trust roots
//! when mutual TLS is required. rustls' default protocol set (1.2 and 1.3,
//! strong AEAD suites only) is used as-is; there is no downgrade path.

use crate::config::TlsConfig;
use crate::error::{HandshakeError, Result, ServerError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;
use x509_parser::prelude::*;

/// Read a PEM certificate chain, leaf first.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServerError::TlsMaterial(format!("{}: {}", path.display(), e)))?;
    let mut reader = io::BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ServerError::TlsMaterial(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::TlsMaterial(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read a PEM private key (PKCS#8, PKCS#1, or SEC1).
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServerError::TlsMaterial(format!("{}: {}", path.display(), e)))?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::TlsMaterial(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| {
            ServerError::TlsMaterial(format!("{}: no private key found", path.display()))
        })
}

/// Read trusted CA certificates for client verification.
fn load_trust_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            ServerError::TlsMaterial(format!("{}: invalid trust root: {}", path.display(), e))
        })?;
    }
    Ok(roots)
}

/// Reject TLS material whose leaf certificate is already expired. Catching
/// this at startup beats every client failing the handshake at runtime.
fn check_leaf_validity(leaf: &CertificateDer<'_>) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| ServerError::TlsMaterial(format!("unparseable server certificate: {e}")))?;
    if !cert.validity().is_valid() {
        return Err(ServerError::TlsMaterial(
            "server certificate is expired or not yet valid".into(),
        ));
    }
    Ok(())
}

/// Build the connection acceptor from configured TLS material.
pub fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&tls.cert)?;
    let key = load_private_key(&tls.key)?;
    check_leaf_validity(&certs[0])?;

    let builder = rustls::ServerConfig::builder();
    let config = if tls.require_client_cert {
        let roots_path = tls.trust_roots.as_ref().ok_or_else(|| {
            ServerError::TlsMaterial("require_client_cert set without trust_roots".into())
        })?;
        let roots = load_trust_roots(roots_path)?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| ServerError::TlsMaterial(format!("client verifier: {e}")))?;
        info!("TLS configured with required client certificates");
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
    } else {
        info!("TLS configured for server authentication only");
        builder.with_no_client_auth().with_single_cert(certs, key)
    }
    .map_err(|e| ServerError::TlsMaterial(format!("certificate chain or key rejected: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Sort a failed handshake into its failure class. tokio-rustls surfaces
/// rustls errors wrapped in `io::Error`.
pub fn classify_handshake_error(err: &io::Error) -> HandshakeError {
    if let Some(tls_err) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) {
        return match tls_err {
            rustls::Error::InvalidCertificate(cert_err) => match cert_err {
                rustls::CertificateError::Expired => HandshakeError::CertificateExpired,
                _ => HandshakeError::UntrustedClientCert,
            },
            rustls::Error::NoCertificatesPresented => HandshakeError::UntrustedClientCert,
            other => HandshakeError::Protocol(other.to_string()),
        };
    }
    HandshakeError::Protocol(err.to_string())
}

/// Subject DN of the peer's end-entity certificate, when one was presented
/// and verified during the handshake.
pub fn peer_subject(connection: &rustls::ServerConnection) -> Option<String> {
    let leaf = connection.peer_certificates()?.first()?;
    subject_from_der(leaf.as_ref())
}

fn subject_from_der(der: &[u8]) -> Option<String> {
    match X509Certificate::from_der(der) {
        Ok((_, cert)) => Some(cert.subject().to_string()),
        Err(_) => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
