//! OmniTAK server binary
//!
//! Loads configuration from an optional JSON file, applies CLI overrides,
//! and runs the broker until SIGINT. Startup failures map to distinct exit
//! codes: 64 configuration, 74 bind, 77 TLS material.

use clap::Parser;
use omnitak_server::{Result, ServerConfig, ServerError, TakServer, TlsConfig, VERSION};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "omnitak-server", version, about = "OmniTAK CoT message broker")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CoT stream port (plain TCP)
    #[arg(short = 'p', long)]
    tcp_port: Option<u16>,

    /// CoT stream port (TLS; requires --tls-cert/--tls-key)
    #[arg(long)]
    tls_port: Option<u16>,

    /// Marti API port (0 disables the HTTP surface)
    #[arg(long)]
    marti_port: Option<u16>,

    /// Maximum concurrently connected clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Server certificate chain, PEM
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Server private key, PEM
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Trusted CA bundle for client certificate verification, PEM
    #[arg(long)]
    tls_trust_roots: Option<PathBuf>,

    /// Require and verify client certificates (mutual TLS)
    #[arg(long)]
    require_client_cert: bool,

    /// Verbose broker logging
    #[arg(short, long)]
    debug: bool,
}

/// File config with CLI overrides on top; CLI wins.
fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if let Some(port) = args.tcp_port {
        config.tcp_port = port;
    }
    if let Some(port) = args.tls_port {
        config.tls_port = Some(port);
    }
    if let Some(port) = args.marti_port {
        config.marti_port = (port != 0).then_some(port);
    }
    if let Some(max) = args.max_clients {
        config.max_clients = max;
    }
    match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => {
            config.tls = Some(TlsConfig {
                cert: cert.clone(),
                key: key.clone(),
                trust_roots: args.tls_trust_roots.clone(),
                require_client_cert: args.require_client_cert,
            });
        }
        (None, None) => {}
        _ => {
            return Err(ServerError::Config(
                "--tls-cert and --tls-key must be given together".into(),
            ));
        }
    }
    if args.debug {
        config.debug = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("omnitak-server: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let directive = if config.debug {
        "omnitak_server=debug"
    } else {
        "omnitak_server=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .init();

    info!("OmniTAK server v{}", VERSION);
    info!(
        tcp_port = config.tcp_port,
        tls_port = config.effective_tls_port(),
        marti_port = config.marti_port,
        max_clients = config.max_clients,
        "starting"
    );

    let mut server = TakServer::new(config);
    if let Err(e) = server.start().await {
        error!(reason = %e, "startup failed");
        std::process::exit(e.exit_code());
    }

    info!("ready, waiting for client connections");
    tokio::signal::ctrl_c().await.ok();
    server.shutdown().await;
}
