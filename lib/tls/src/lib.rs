//! TLS for the join service.
//!
//! The join service presents a self-signed certificate.
//! Clients do not validate it against any CA or hostname,
//! they trust it only if its SHA-256 fingerprint matches the
//! fingerprint carried in the connection token.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use rustls::{
  ClientConfig, ServerConfig,
  crypto::CryptoProvider,
  pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
};

mod fingerprint;
mod provision;
mod verifier;

pub use fingerprint::*;
pub use provision::*;
pub use verifier::*;

/// The provider is passed explicitly to every config,
/// so nothing depends on a process-wide default being installed.
pub fn crypto_provider() -> Arc<CryptoProvider> {
  Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Client config trusting only the pinned certificate.
pub fn pinned_client_config(
  verifier: Arc<PinnedCertVerifier>,
) -> anyhow::Result<ClientConfig> {
  let config = ClientConfig::builder_with_provider(crypto_provider())
    .with_safe_default_protocol_versions()
    .context("Failed to select TLS protocol versions")?
    .dangerous()
    .with_custom_certificate_verifier(verifier)
    .with_no_client_auth();
  Ok(config)
}

/// Server config presenting the provisioned certificate.
pub fn server_config(
  cert_path: &Path,
  key_path: &Path,
) -> anyhow::Result<ServerConfig> {
  let certs = CertificateDer::pem_file_iter(cert_path)
    .with_context(|| {
      format!("Failed to read certificate at {cert_path:?}")
    })?
    .collect::<Result<Vec<_>, _>>()
    .with_context(|| format!("Invalid certificate at {cert_path:?}"))?;
  let key = PrivateKeyDer::from_pem_file(key_path)
    .with_context(|| format!("Invalid private key at {key_path:?}"))?;
  ServerConfig::builder_with_provider(crypto_provider())
    .with_safe_default_protocol_versions()
    .context("Failed to select TLS protocol versions")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("Invalid ssl cert / key")
}
