use std::sync::{Arc, Mutex};

use rustls::{
  CertificateError, DigitallySignedStruct, SignatureScheme,
  client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
  },
  crypto::{CryptoProvider, WebPkiSupportedAlgorithms},
  pki_types::{CertificateDer, ServerName, UnixTime},
};

use crate::Fingerprint;

/// The presented certificate does not hash to the pinned fingerprint.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
  "The clustering service certificate fingerprint {presented} does not match the expected {expected}"
)]
pub struct FingerprintMismatch {
  pub expected: Fingerprint,
  pub presented: Fingerprint,
}

/// Trusts a server certificate only by its fingerprint.
///
/// Hostname, CA chain and validity period are not checked.
/// Handshake signatures are still verified, so the server must hold
/// the private key belonging to the pinned certificate.
#[derive(Debug)]
pub struct PinnedCertVerifier {
  expected: Fingerprint,
  algorithms: WebPkiSupportedAlgorithms,
  /// The fingerprint of the last rejected certificate.
  mismatch: Mutex<Option<FingerprintMismatch>>,
}

impl PinnedCertVerifier {
  pub fn new(expected: Fingerprint) -> Arc<PinnedCertVerifier> {
    Self::with_provider(expected, &crate::crypto_provider())
  }

  pub fn with_provider(
    expected: Fingerprint,
    provider: &CryptoProvider,
  ) -> Arc<PinnedCertVerifier> {
    Arc::new(PinnedCertVerifier {
      expected,
      algorithms: provider.signature_verification_algorithms,
      mismatch: Mutex::new(None),
    })
  }

  pub fn expected(&self) -> &Fingerprint {
    &self.expected
  }

  /// Set once a certificate was rejected for a fingerprint mismatch.
  /// Transport errors are opaque by the time they reach the http client,
  /// this is how callers tell a mismatch from any other failure.
  pub fn mismatch(&self) -> Option<FingerprintMismatch> {
    self.mismatch.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl ServerCertVerifier for PinnedCertVerifier {
  fn verify_server_cert(
    &self,
    end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, rustls::Error> {
    let presented = Fingerprint::from_der(end_entity.as_ref());
    if presented == self.expected {
      return Ok(ServerCertVerified::assertion());
    }
    let mismatch = FingerprintMismatch {
      expected: self.expected,
      presented,
    };
    tracing::warn!("{mismatch}");
    *self.mismatch.lock().unwrap_or_else(|e| e.into_inner()) =
      Some(mismatch);
    Err(rustls::Error::InvalidCertificate(
      CertificateError::ApplicationVerificationFailure,
    ))
  }

  fn verify_tls12_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls12_signature(
      message,
      cert,
      dss,
      &self.algorithms,
    )
  }

  fn verify_tls13_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls13_signature(
      message,
      cert,
      dss,
      &self.algorithms,
    )
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self.algorithms.supported_schemes()
  }
}
