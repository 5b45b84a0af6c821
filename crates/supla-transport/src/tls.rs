//! TLS transport (rustls over TCP).
//!
//! Devices in the field speak TLS to port 2016 with server
//! certificates that are almost always self-signed, so the client
//! side ships a verifier that accepts any certificate. The transport
//! still gets wire privacy; identity comes from the registration
//! handshake, not the certificate.

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime,
};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::io::{spawn_io, FrameReceiver, FrameSender};
use crate::tcp::{apply_keepalive, TcpConfig};
use crate::traits::TransportServer;

/// Load a rustls server config from PEM certificate and key files.
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<rustls::ServerConfig>> {
    let cert_file = std::fs::File::open(cert_path.as_ref())?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::io::Result<_>>()?;
    if certs.is_empty() {
        return Err(TransportError::Tls("no certificates in PEM file".into()));
    }

    let key_file = std::fs::File::open(key_path.as_ref())?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| TransportError::Tls("no private key in PEM file".into()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Build a rustls server config from a DER certificate and PKCS#8 key
/// (the shape certificate generators hand out).
pub fn server_config_from_der(
    cert: Vec<u8>,
    key: Vec<u8>,
) -> Result<Arc<rustls::ServerConfig>> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(cert)],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
        )
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Certificate verifier that accepts anything (self-signed servers).
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// TLS transport (client side)
pub struct TlsTransport {
    config: TcpConfig,
    connector: TlsConnector,
}

impl TlsTransport {
    /// Client transport that skips certificate verification.
    pub fn new_insecure() -> Self {
        let tls = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        Self {
            config: TcpConfig::default(),
            connector: TlsConnector::from(Arc::new(tls)),
        }
    }

    /// Client transport with a caller-supplied rustls config.
    pub fn with_client_config(tls: Arc<ClientConfig>) -> Self {
        Self {
            config: TcpConfig::default(),
            connector: TlsConnector::from(tls),
        }
    }

    /// Connect and complete the TLS handshake.
    pub async fn connect(&self, addr: &str) -> Result<(FrameSender, FrameReceiver)> {
        debug!("connecting to {} (tls)", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        apply_keepalive(&stream, self.config.keepalive_secs);

        let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let (sender, receiver) = spawn_io(stream);
        info!("connected to {} (tls)", addr);
        Ok((sender, receiver))
    }
}

/// How long a peer gets to finish the TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS server for accepting connections.
///
/// Each handshake runs on its own task with a deadline; a peer that
/// opens TCP and never sends a ClientHello cannot hold up the accept
/// loop. [`TransportServer::accept`] only yields connections whose
/// handshake completed.
pub struct TlsServer {
    local_addr: SocketAddr,
    ready_rx: mpsc::Receiver<(FrameSender, FrameReceiver, SocketAddr)>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TlsServer {
    /// Bind to an address with a prepared rustls config.
    pub async fn bind(addr: &str, tls: Arc<rustls::ServerConfig>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let acceptor = TlsAcceptor::from(tls);
        let config = TcpConfig::default();
        let (ready_tx, ready_rx) = mpsc::channel(16);

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept error: {}", e);
                        continue;
                    }
                };
                debug!("connection accepted from {} (tls)", peer_addr);
                apply_keepalive(&stream, config.keepalive_secs);

                let acceptor = acceptor.clone();
                let ready_tx = ready_tx.clone();
                tokio::spawn(async move {
                    match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(stream)) => {
                            let (sender, receiver) = spawn_io(stream);
                            let _ = ready_tx.send((sender, receiver, peer_addr)).await;
                        }
                        Ok(Err(e)) => debug!("tls handshake with {} failed: {}", peer_addr, e),
                        Err(_) => debug!("tls handshake with {} timed out", peer_addr),
                    }
                });
            }
        });

        info!("listening on {} (tls)", addr);
        Ok(Self {
            local_addr,
            ready_rx,
            accept_task,
        })
    }
}

impl Drop for TlsServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl TransportServer for TlsServer {
    type Sender = FrameSender;
    type Receiver = FrameReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        self.ready_rx
            .recv()
            .await
            .ok_or_else(|| TransportError::AcceptFailed("listener task ended".into()))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
