use crate::error::CertificateLoadError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// TLS termination for the listener, built from `--tls-cert` and `--tls-key`.
#[derive(Clone)]
pub struct TlsManager {
    acceptor: Option<TlsAcceptor>,
}

impl TlsManager {
    pub fn new(
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self, CertificateLoadError> {
        let acceptor = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(Self::create_tls_acceptor(cert, key)?),
            _ => None,
        };

        Ok(Self { acceptor })
    }

    pub fn disabled() -> Self {
        Self { acceptor: None }
    }

    pub fn get_acceptor(&self) -> Option<&TlsAcceptor> {
        self.acceptor.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.acceptor.is_some()
    }

    fn create_tls_acceptor(
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<TlsAcceptor, CertificateLoadError> {
        let cert_chain = load_certs(cert_path)?;
        let private_key = load_private_key(key_path)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)?;

        // Prefer HTTP/2, fall back to HTTP/1.1
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        info!("Serving TLS with certificate {}", cert_path.display());
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, CertificateLoadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertificateLoadError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertificateLoadError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
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

/// The first PKCS#8, PKCS#1 or SEC1 key in the file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertificateLoadError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CertificateLoadError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| CertificateLoadError::MissingPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pair(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_acceptor_from_pem_files() {
        let dir = TempDir::new().unwrap();
        let (cert_path, key_path) = write_pair(&dir);

        let manager = TlsManager::new(Some(cert_path.as_path()), Some(key_path.as_path())).unwrap();
        assert!(manager.is_enabled());
    }

    #[test]
    fn test_no_files_means_plain_http() {
        let manager = TlsManager::new(None, None).unwrap();
        assert!(!manager.is_enabled());
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = TempDir::new().unwrap();
        let (cert_path, _) = write_pair(&dir);

        assert!(matches!(
            TlsManager::new(Some(cert_path.as_path()), Some(cert_path.as_path())),
            Err(CertificateLoadError::MissingPrivateKey(_))
        ));
    }

    #[test]
    fn test_missing_cert_file() {
        let dir = TempDir::new().unwrap();
        let (_, key_path) = write_pair(&dir);

        assert!(matches!(
            TlsManager::new(
                Some(dir.path().join("nope.pem").as_path()),
                Some(key_path.as_path())
            ),
            Err(CertificateLoadError::Read { .. })
        ));
    }
}
