//! Read-only Marti API
//!
//! TAK-compatible capability subset on the HTTP port: server metadata, a
//! client-endpoints snapshot, and the live TLS posture. All routes are GET,
//! return JSON, and perform no mutations; trust is delegated to
//! deployment-level network controls.

use crate::config::ServerConfig;
use crate::router::CotRouter;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Clone)]
struct MartiState {
    router: Arc<CotRouter>,
    config: Arc<ServerConfig>,
    hostname: String,
}

#[derive(Serialize)]
struct VersionResponse {
    version: String,
    #[serde(rename = "type")]
    server_type: String,
    api: String,
    hostname: String,
}

#[derive(Serialize)]
struct ClientEndpoint {
    uid: String,
    callsign: String,
    ip: String,
    port: u16,
}

#[derive(Serialize)]
struct ClientEndpointsResponse {
    clients: Vec<ClientEndpoint>,
}

#[derive(Serialize)]
struct TlsConfigResponse {
    tls_enabled: bool,
    client_auth_required: bool,
}

/// Build the route table. Split out from [`serve`] so tests can drive it
/// against an ephemeral listener.
pub fn app(router: Arc<CotRouter>, config: Arc<ServerConfig>) -> Router {
    let hostname =
        std::env::var("HOSTNAME").unwrap_or_else(|_| crate::FALLBACK_HOSTNAME.to_string());
    let state = MartiState {
        router,
        config,
        hostname,
    };
    Router::new()
        .route("/Marti/api/version", get(version))
        .route("/Marti/api/clientEndPoints", get(client_endpoints))
        .route("/Marti/api/tls/config", get(tls_config))
        .with_state(state)
}

/// Serve until the token trips.
pub async fn serve(
    listener: TcpListener,
    router: Arc<CotRouter>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let result = axum::serve(listener, app(router, config))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    if let Err(e) = result {
        error!(reason = %e, "Marti service terminated");
    }
}

async fn version(State(state): State<MartiState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: crate::VERSION.to_string(),
        server_type: "OmniTAK-Server".to_string(),
        api: "2".to_string(),
        hostname: state.hostname.clone(),
    })
}

/// Live router snapshot augmented with peer socket addresses. The broker
/// never inspects event content, so uid and callsign stay empty.
async fn client_endpoints(State(state): State<MartiState>) -> Json<ClientEndpointsResponse> {
    let clients = state
        .router
        .snapshot()
        .into_iter()
        .map(|client| ClientEndpoint {
            uid: String::new(),
            callsign: String::new(),
            ip: client.addr.ip().to_string(),
            port: client.addr.port(),
        })
        .collect();
    Json(ClientEndpointsResponse { clients })
}

async fn tls_config(State(state): State<MartiState>) -> Json<TlsConfigResponse> {
    Json(TlsConfigResponse {
        tls_enabled: state.config.tls_enabled(),
        client_auth_required: state.config.client_auth_required(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_response_shape() {
        let response = VersionResponse {
            version: "0.9.0".to_string(),
            server_type: "OmniTAK-Server".to_string(),
            api: "2".to_string(),
            hostname: "test-host".to_string(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "OmniTAK-Server");
        assert_eq!(value["api"], "2");
        assert_eq!(value["hostname"], "test-host");
    }

    #[test]
    fn endpoints_response_shape() {
        let response = ClientEndpointsResponse {
            clients: vec![ClientEndpoint {
                uid: String::new(),
                callsign: String::new(),
                ip: "10.0.0.5".to_string(),
                port: 4242,
            }],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["clients"][0]["ip"], "10.0.0.5");
        assert_eq!(value["clients"][0]["port"], 4242);
        assert_eq!(value["clients"][0]["uid"], "");
    }
}
