//! TLS certificate fingerprint computation and pinning
//!
//! Fingerprints hash the full SPKI (SubjectPublicKeyInfo) DER encoding, not
//! just the raw public key bytes. An enclave attests to this value, so a TLS
//! connection whose leaf certificate hashes to it terminates inside the
//! verified enclave.

use rustls::pki_types::{CertificateDer, ServerName};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::certs;
use crate::error::{Error, Result};

/// Compute SHA256 fingerprint of a certificate's public key
pub fn cert_pubkey_fingerprint(cert_der: &CertificateDer<'_>) -> Result<String> {
    let cert = certs::parse_certificate(cert_der.as_ref())
        .map_err(|e| Error::Tls(format!("Failed to parse certificate: {}", e)))?;

    certs::spki_fingerprint(&cert).map_err(|e| Error::Tls(format!("Failed to encode SPKI: {}", e)))
}

fn web_pki_roots() -> rustls::RootCertStore {
    rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

fn install_crypto_provider() {
    // Fails only when a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Custom certificate verifier that pins to a specific public key fingerprint
///
/// This verifier:
/// 1. First validates the certificate chain normally (CA signatures, expiry, etc.)
/// 2. Then checks that the server cert's SPKI fingerprint matches the pinned value
#[derive(Debug)]
pub struct PinnedCertVerifier {
    /// The expected SPKI fingerprint (hex-encoded SHA256)
    pinned_fingerprint: String,
    /// Standard certificate verifier for chain validation
    inner: Arc<rustls::client::WebPkiServerVerifier>,
}

impl PinnedCertVerifier {
    pub fn new(pinned_fingerprint: &str) -> Result<Self> {
        install_crypto_provider();

        let inner = rustls::client::WebPkiServerVerifier::builder(Arc::new(web_pki_roots()))
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build verifier: {}", e)))?;

        Ok(Self {
            pinned_fingerprint: pinned_fingerprint.to_ascii_lowercase(),
            inner,
        })
    }

    fn check_fingerprint(&self, end_entity: &CertificateDer<'_>) -> std::result::Result<(), rustls::Error> {
        let actual_fingerprint = cert_pubkey_fingerprint(end_entity)
            .map_err(|e| rustls::Error::General(format!("Fingerprint computation failed: {}", e)))?;

        if actual_fingerprint != self.pinned_fingerprint {
            return Err(rustls::Error::General(format!(
                "Certificate fingerprint mismatch: expected {}, got {}",
                self.pinned_fingerprint, actual_fingerprint
            )));
        }
        Ok(())
    }
}

impl rustls::client::danger::ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        self.check_fingerprint(end_entity)?;

        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Create a reqwest client with certificate pinning
///
/// This client will reject any connection where the server's certificate
/// public key fingerprint doesn't match the pinned value.
pub fn create_pinned_client(pinned_fingerprint: &str) -> Result<reqwest::Client> {
    let verifier = PinnedCertVerifier::new(pinned_fingerprint)?;

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build HTTP client: {}", e)))
}

/// Connect to `host:443` and check the served certificate carries the
/// attested key.
pub async fn verify_tls_binding(host: &str, expected_fingerprint: &str) -> Result<()> {
    install_crypto_provider();

    let stream = TcpStream::connect((host, 443))
        .await
        .map_err(|e| Error::Tls(format!("Failed to connect to {}: {}", host, e)))?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(web_pki_roots())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Tls(format!("Invalid server name: {}", host)))?;

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

    let (_, conn) = tls_stream.get_ref();
    let leaf = conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| Error::Tls("No peer certificates".into()))?;

    let actual_fingerprint = cert_pubkey_fingerprint(leaf)?;
    if !actual_fingerprint.eq_ignore_ascii_case(expected_fingerprint) {
        return Err(Error::Tls(format!(
            "Served certificate key {} does not match attested key {}",
            actual_fingerprint, expected_fingerprint
        )));
    }

    tracing::debug!(host, "TLS key matches attestation");
    Ok(())
}
