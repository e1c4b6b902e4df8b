//! TLS material for overlay listeners.
//!
//! The overlay daemon issues a certificate for the node's DNS name as a
//! single PEM bundle (private key plus chain). Bundles are cached on disk
//! under `<state_dir>/certs/` so a restart can serve TLS even if the daemon
//! cannot reach its certificate authority.
//!
//! # ALPN
//!
//! Listeners advertise only `http/1.1`. The proxy speaks HTTP/1 to clients and
//! tunnels upgrades as raw bytes, which breaks under HTTP/2 framing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use super::error::OverlayError;

/// Directory below the state dir holding cached bundles.
pub const CERT_DIR: &str = "certs";

/// Build a server config from a PEM bundle containing a key and a chain.
pub fn server_config_from_pem(pem: &[u8]) -> Result<ServerConfig, OverlayError> {
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OverlayError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

    if chain.is_empty() {
        return Err(OverlayError::Tls("No certificates found in PEM".into()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| OverlayError::Tls(format!("Failed to parse private key PEM: {}", e)))?
        .ok_or_else(|| OverlayError::Tls("No private key found in PEM".into()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

/// Build a TLS acceptor from a PEM bundle.
pub fn acceptor_from_pem(pem: &[u8]) -> Result<TlsAcceptor, OverlayError> {
    Ok(TlsAcceptor::from(Arc::new(server_config_from_pem(pem)?)))
}

/// On-disk cache of certificate bundles keyed by DNS name.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    /// Cache rooted at `<state_dir>/certs`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(CERT_DIR),
        }
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{domain}.pem"))
    }

    /// Read a cached bundle, if present.
    pub fn load(&self, domain: &str) -> Result<Option<Vec<u8>>, OverlayError> {
        let path = self.path_for(domain);
        match fs::read(&path) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(OverlayError::CertCache { path, source }),
        }
    }

    /// Write a bundle readable only by the current user.
    pub fn store(&self, domain: &str, pem: &[u8]) -> Result<(), OverlayError> {
        fs::create_dir_all(&self.dir).map_err(|source| OverlayError::CertCache {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(domain);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|source| OverlayError::CertCache {
                path: path.clone(),
                source,
            })?;
        file.write_all(pem)
            .map_err(|source| OverlayError::CertCache { path, source })?;

        debug!("Cached certificate for {}", domain);
        Ok(())
    }

    /// Prefer a freshly fetched bundle, falling back to the cache.
    ///
    /// A fresh bundle replaces the cached copy. Cache write failures are
    /// logged and ignored.
    pub fn refresh(
        &self,
        domain: &str,
        fetched: Result<Vec<u8>, OverlayError>,
    ) -> Result<Vec<u8>, OverlayError> {
        match fetched {
            Ok(pem) => {
                if let Err(e) = self.store(domain, &pem) {
                    warn!("Failed to cache certificate: {}", e);
                }
                Ok(pem)
            }
            Err(fetch_err) => match self.load(domain)? {
                Some(pem) => {
                    warn!(
                        "Using cached certificate for {} after fetch failed: {}",
                        domain, fetch_err
                    );
                    Ok(pem)
                }
                None => Err(fetch_err),
            },
        }
    }
}
