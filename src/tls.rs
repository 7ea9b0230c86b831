//! Client-side TLS shared by the raw probe and the certificate checker.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("TLS configuration error: {0}")]
    Config(String),
    #[error("invalid server name: {0}")]
    InvalidHost(String),
    #[error("connection failed: {0}")]
    Connect(std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("certificate error: {0}")]
    Certificate(String),
}

static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

/// Process-wide connector trusting the bundled webpki roots.
pub fn connector() -> Result<TlsConnector, TlsError> {
    if let Some(connector) = CONNECTOR.get() {
        return Ok(connector.clone());
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TlsError::Config(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(CONNECTOR
        .get_or_init(|| TlsConnector::from(Arc::new(config)))
        .clone())
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::InvalidHost(host.to_string()))
}

/// Run the client handshake over an established TCP stream.
pub async fn handshake(
    stream: TcpStream,
    host: &str,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let name = server_name(host)?;
    let connector = connector()?;

    tokio::time::timeout(timeout, connector.connect(name, stream))
        .await
        .map_err(|_| TlsError::Timeout(timeout))?
        .map_err(TlsError::Handshake)
}

/// Connect to `host:port` and complete a TLS handshake, all within `timeout`.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let fut = async {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(TlsError::Connect)?;
        handshake(stream, host, timeout).await
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TlsError::Timeout(timeout))?
}

/// Leaf certificate presented by the peer.
pub fn leaf_certificate(stream: &TlsStream<TcpStream>) -> Result<CertificateDer<'static>, TlsError> {
    let (_, conn) = stream.get_ref();
    conn.peer_certificates()
        .and_then(|certs| certs.first())
        .cloned()
        .ok_or_else(|| TlsError::Certificate("peer presented no certificate".to_string()))
}
