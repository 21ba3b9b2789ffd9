//! # Certificate-less TLS
//!
//! TLS for connections whose endpoints are authenticated by the shared key,
//! not by certificates.
//!
//! rustls ships no anonymous cipher suites, so the certificate-less intent is
//! rendered as: the server presents a freshly generated self-signed
//! certificate, and the client accepts whatever certificate it is shown.
//! The channel is private against passive observers; peer authentication is
//! the application layer's handshake.

use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::error::{ExchangeError, Result};
use crate::transport::BoxedIo;

/// Generate an ephemeral self-signed identity for one listener.
fn ephemeral_identity() -> Result<(Vec<Certificate>, PrivateKey)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
        .map_err(|e| ExchangeError::Tls(format!("certificate generation error: {e}")))?;

    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    let chain = certs(&mut cert_pem.as_bytes())
        .map_err(|_| ExchangeError::Tls("failed to parse generated certificate".into()))?
        .into_iter()
        .map(Certificate)
        .collect::<Vec<_>>();

    let keys = pkcs8_private_keys(&mut key_pem.as_bytes())
        .map_err(|_| ExchangeError::Tls("failed to parse generated private key".into()))?;
    let key = keys
        .into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| ExchangeError::Tls("no private key in generated identity".into()))?;

    Ok((chain, key))
}

/// Build the acceptor a listener uses in [`SocketMode::AnonymousTls`].
///
/// [`SocketMode::AnonymousTls`]: crate::transport::SocketMode::AnonymousTls
pub fn acceptor() -> Result<TlsAcceptor> {
    let (chain, key) = ephemeral_identity()?;
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| ExchangeError::Tls(format!("TLS error: {e}")))?;

    debug!("ephemeral TLS identity ready");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept-side handshake; wraps the socket for channel use.
pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<BoxedIo> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| ExchangeError::Tls(format!("TLS accept failed: {e}")))?;
    Ok(Box::new(tls_stream))
}

/// Certificate verification is intentionally skipped: the peer proves itself
/// through the application handshake, and the listener's certificate is
/// ephemeral anyway.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Connect-side handshake; wraps the socket for channel use.
pub async fn connect(stream: TcpStream) -> Result<BoxedIo> {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let domain = ServerName::try_from("localhost")
        .map_err(|_| ExchangeError::Tls("invalid server name".into()))?;

    let tls_stream = connector
        .connect(domain, stream)
        .await
        .map_err(|e| ExchangeError::Tls(format!("TLS connection failed: {e}")))?;
    Ok(Box::new(tls_stream))
}
