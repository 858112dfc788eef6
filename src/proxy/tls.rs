//! Trust configuration for connections dialed towards backends.

use crate::error::CertificateLoadError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accepts any server certificate. Only installed for `--skip-cert-validation`.
#[derive(Debug)]
pub struct NoVerifier(Arc<CryptoProvider>);

impl NoVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self(provider)
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Builds the one client TLS configuration shared by every backend connection.
pub struct TrustManager {
    ca_files: Vec<PathBuf>,
    skip_validation: bool,
    load_system_roots: bool,
}

impl TrustManager {
    pub fn new(ca_files: &[PathBuf], skip_validation: bool) -> Self {
        Self {
            ca_files: ca_files.to_vec(),
            skip_validation,
            load_system_roots: true,
        }
    }

    /// Leaves the system roots out of the pool.
    pub fn without_system_roots(mut self) -> Self {
        self.load_system_roots = false;
        self
    }

    pub fn build(&self) -> Result<Arc<ClientConfig>, CertificateLoadError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = self.root_store()?;
        info!("Backend trust pool holds {} certificates", roots.len());

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = if self.skip_validation {
            warn!("Skipping backend certificate validation - dangerous!");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier::new(provider)))
                .with_no_client_auth()
        } else {
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(Arc::new(config))
    }

    pub fn root_store(&self) -> Result<RootCertStore, CertificateLoadError> {
        let mut roots = RootCertStore::empty();

        if self.load_system_roots {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                warn!("Couldn't load system root certificates: {}", e);
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            debug!("Loaded {} system roots ({} ignored)", added, ignored);
        }

        for ca_file in &self.ca_files {
            for cert in load_ca_file(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| CertificateLoadError::InvalidPem {
                        path: ca_file.clone(),
                        reason: e.to_string(),
                    })?;
            }
            info!("Trusting CA certificates from {}", ca_file.display());
        }

        Ok(roots)
    }
}

fn load_ca_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertificateLoadError> {
    let pem = std::fs::read(path).map_err(|source| CertificateLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateLoadError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertificateLoadError::InvalidPem {
            path: path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }

    Ok(certs)
}
