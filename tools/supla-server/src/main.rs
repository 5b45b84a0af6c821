//! SUPLA protocol server
//!
//! Standalone server binary: loads the device registry from a TOML
//! config and listens for devices and clients on plain TCP and TLS.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use supla_server::{Server, ServerConfig};
use supla_transport::{TcpServer, TlsServer};

#[derive(Parser)]
#[command(name = "supla-server")]
#[command(about = "SUPLA protocol server")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Plain TCP listen address
    #[arg(short, long, default_value = "0.0.0.0:2015")]
    listen: SocketAddr,

    /// TLS listen address
    #[arg(long, default_value = "0.0.0.0:2016")]
    tls_listen: SocketAddr,

    /// TLS certificate chain (PEM). Omit to use an ephemeral
    /// self-signed certificate.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Disable the TLS listener
    #[arg(long)]
    no_tls: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config: ServerConfig = toml::from_str(&config_text)
        .with_context(|| format!("parsing {}", cli.config.display()))?;

    let server = Server::new(config)?;
    tracing::info!(
        "registry seeded: {} devices, {} channels",
        server.registry().device_count(),
        server.registry().channel_count()
    );

    let plain = {
        let server = server.handle();
        let listener = TcpServer::bind(&cli.listen.to_string()).await?;
        tokio::spawn(async move { server.serve_on(listener).await })
    };

    let tls = if cli.no_tls {
        None
    } else {
        let tls_config = match (&cli.cert, &cli.key) {
            (Some(cert), Some(key)) => supla_transport::load_server_config(cert, key)?,
            _ => {
                tracing::warn!("no certificate configured, using an ephemeral self-signed one");
                let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
                supla_transport::server_config_from_der(
                    certified.cert.der().to_vec(),
                    certified.key_pair.serialize_der(),
                )?
            }
        };

        let server = server.handle();
        let listener = TlsServer::bind(&cli.tls_listen.to_string(), tls_config).await?;
        Some(tokio::spawn(async move { server.serve_on(listener).await }))
    };

    tracing::info!("server ready");

    plain.await??;
    if let Some(tls) = tls {
        tls.await??;
    }
    Ok(())
}
