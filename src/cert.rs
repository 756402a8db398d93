//! Certificate authority for the MITM front-end.
//!
//! Leaf certificates are minted on demand for each CONNECT host and cached
//! for the lifetime of the process.

use crate::error::ConfigError;

use log::{debug, info};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const CA_COMMON_NAME: &str = "proxy-ng CA";

/// Most leaf configs kept at once.
const MAX_CACHED_LEAVES: usize = 1024;

fn cert_error(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Certificate(e.to_string())
}

/// The CA that signs per-host certificates.
pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    /// PEM of the CA as clients should install it.
    cert_pem: String,
    provider: Arc<CryptoProvider>,
    leaves: Mutex<HashMap<String, Arc<ServerConfig>>>,
    cache_limit: usize,
}

impl CertificateAuthority {
    /// Generate a fresh self-signed CA.
    pub fn generate() -> Result<Self, ConfigError> {
        let key = KeyPair::generate().map_err(cert_error)?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name.push(DnType::OrganizationName, "proxy-ng");
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let cert = params.self_signed(&key).map_err(cert_error)?;
        let cert_pem = cert.pem();
        Ok(Self::from_parts(cert, key, cert_pem))
    }

    /// Load a CA from PEM files.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        let cert_pem = read_pem(cert_path)?;
        let key_pem = read_pem(key_path)?;

        let key = KeyPair::from_pem(&key_pem).map_err(cert_error)?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem).map_err(cert_error)?;
        // Re-signing yields an issuer with the same subject and key as the PEM on disk.
        let cert = params.self_signed(&key).map_err(cert_error)?;

        Ok(Self::from_parts(cert, key, cert_pem))
    }

    /// Load the CA from disk, or generate one and write it there.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                info!("Loading MITM CA from {}", cert_path.display());
                Self::load(cert_path, key_path)
            }
            (false, false) => {
                let ca = Self::generate()?;
                write_pem(cert_path, &ca.cert_pem)?;
                write_pem(key_path, &ca.key.serialize_pem())?;
                info!(
                    "Generated MITM CA, install {} in clients to trust it",
                    cert_path.display()
                );
                Ok(ca)
            }
            (true, false) => Err(ConfigError::Certificate(format!(
                "{} exists but {} is missing",
                cert_path.display(),
                key_path.display()
            ))),
            (false, true) => Err(ConfigError::Certificate(format!(
                "{} exists but {} is missing",
                key_path.display(),
                cert_path.display()
            ))),
        }
    }

    fn from_parts(cert: Certificate, key: KeyPair, cert_pem: String) -> Self {
        Self {
            cert,
            key,
            cert_pem,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            leaves: Mutex::new(HashMap::new()),
            cache_limit: MAX_CACHED_LEAVES,
        }
    }

    /// PEM encoding of the CA certificate.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// DER encoding of the CA certificate.
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// TLS server configuration presenting a certificate for `host`.
    pub fn server_config_for(&self, host: &str) -> Result<Arc<ServerConfig>, ConfigError> {
        let host = host.to_ascii_lowercase();
        if let Some(config) = self.leaves.lock().get(&host) {
            return Ok(config.clone());
        }

        let config = Arc::new(self.mint(&host)?);
        let mut leaves = self.leaves.lock();
        if leaves.len() >= self.cache_limit && !leaves.contains_key(&host) {
            // Evict an arbitrary host; it is re-minted on its next CONNECT.
            if let Some(evicted) = leaves.keys().next().cloned() {
                leaves.remove(&evicted);
            }
        }
        Ok(leaves.entry(host).or_insert(config).clone())
    }

    fn mint(&self, host: &str) -> Result<ServerConfig, ConfigError> {
        debug!("Minting certificate for {}", host);

        let leaf_key = KeyPair::generate().map_err(cert_error)?;
        let mut params = CertificateParams::new(vec![host.to_string()]).map_err(cert_error)?;
        params.distinguished_name.push(DnType::CommonName, host);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let leaf = params
            .signed_by(&leaf_key, &self.cert, &self.key)
            .map_err(cert_error)?;

        let chain = vec![leaf.der().clone()];
        let key = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());

        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(cert_error)?
            .with_no_client_auth()
            .with_single_cert(chain, key.into())
            .map_err(cert_error)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(config)
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cached_leaves", &self.leaves.lock().len())
            .finish_non_exhaustive()
    }
}

fn read_pem(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_pem(path: &Path, pem: &str) -> Result<(), ConfigError> {
    std::fs::write(path, pem).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
