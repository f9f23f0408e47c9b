//! Server side TLS material

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::ConfigError;

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";

/// Build a server configuration from `tls.crt` and `tls.key` in `dir`.
///
/// Returns `None` when the directory does not exist, in which case the
/// listener speaks plain SMTP.
pub fn load_server_config(dir: &Path) -> Result<Option<Arc<ServerConfig>>, ConfigError> {
    if !dir.is_dir() {
        tracing::debug!("no certificate directory at {}", dir.display());
        return Ok(None);
    }

    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);

    let certificates = CertificateDer::pem_file_iter(&cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|source| ConfigError::TlsMaterial {
            path: cert_path.clone(),
            source,
        })?;
    if certificates.is_empty() {
        return Err(ConfigError::NoCertificates(cert_path));
    }

    let private_key =
        PrivateKeyDer::from_pem_file(&key_path).map_err(|source| ConfigError::TlsMaterial {
            path: key_path.clone(),
            source,
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certificates, private_key)?;

    tracing::info!("using TLS certificate from {}", cert_path.display());
    Ok(Some(Arc::new(config)))
}
