//! Identity provider access for the join protocol.
//!
//! Only two capabilities are needed:
//! - The control node mints a scoped application credential.
//! - The join service checks that a presented credential
//!   still authenticates and may read the catalog.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod keystone;

pub use keystone::KeystoneClient;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
  /// The identity provider rejected the credentials (401 / 403).
  #[error("Identity provider rejected the credentials | {0}")]
  Unauthorized(String),
  #[error("Failed to reach identity provider")]
  Connection(#[source] reqwest::Error),
  #[error("Unexpected identity provider response | {0}")]
  Protocol(String),
  #[error("Invalid identity provider request | {0}")]
  InvalidInput(String),
}

/// The privileged principal the control node mints credentials with.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServicePrincipal {
  pub username: String,
  pub password: String,
  pub user_domain: String,
  pub project: String,
  pub project_domain: String,
}

impl std::fmt::Debug for ServicePrincipal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServicePrincipal")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .field("user_domain", &self.user_domain)
      .field("project", &self.project)
      .field("project_domain", &self.project_domain)
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
  pub method: String,
  pub path: String,
  pub service: String,
}

impl AccessRule {
  /// The single capability a join credential carries.
  pub fn catalog_read() -> AccessRule {
    AccessRule {
      method: String::from("GET"),
      path: String::from("/v3/auth/catalog"),
      service: String::from("identity"),
    }
  }
}

#[derive(Clone)]
pub struct ApplicationCredentialRequest {
  pub name: String,
  pub secret: String,
  /// Name of a global role, looked up before creation.
  pub role: String,
  pub access_rules: Vec<AccessRule>,
  pub expires_at: DateTime<Utc>,
  /// Whether the credential may create further credentials.
  pub unrestricted: bool,
}

impl std::fmt::Debug for ApplicationCredentialRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApplicationCredentialRequest")
      .field("name", &self.name)
      .field("secret", &"<redacted>")
      .field("role", &self.role)
      .field("access_rules", &self.access_rules)
      .field("expires_at", &self.expires_at)
      .field("unrestricted", &self.unrestricted)
      .finish()
  }
}

#[derive(Clone)]
pub struct ApplicationCredential {
  pub id: String,
  pub name: String,
  pub secret: String,
  pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApplicationCredential {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApplicationCredential")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("secret", &"<redacted>")
      .field("expires_at", &self.expires_at)
      .finish()
  }
}

pub trait IdentityProvider: Send + Sync + 'static {
  /// Authenticates as `principal` and mints an application credential
  /// owned by it.
  fn create_application_credential(
    &self,
    principal: &ServicePrincipal,
    request: ApplicationCredentialRequest,
  ) -> impl Future<Output = Result<ApplicationCredential, IdentityError>>
  + Send;

  /// Authenticates with the application credential and
  /// reads the catalog with the resulting token.
  /// An expired or unknown credential is [IdentityError::Unauthorized].
  fn verify_application_credential(
    &self,
    id: &str,
    secret: &str,
  ) -> impl Future<Output = Result<(), IdentityError>> + Send;
}
