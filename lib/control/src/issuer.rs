use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use identity::{
  AccessRule, ApplicationCredentialRequest, IdentityError,
  IdentityProvider, ServicePrincipal,
};
use node_config::{ConfigError, ConfigStore, keys};
use serde::{Deserialize, Serialize};
use tls::Fingerprint;
use token::{CREDENTIAL_SECRET_LEN, ConnectionToken, TokenError};

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
  #[error(
    "Running add-compute is only supported on a control node (role: {})",
    .0.as_deref().unwrap_or("unset")
  )]
  Role(Option<String>),
  #[error("Invalid node config")]
  Config(#[from] ConfigError),
  #[error("Stored certificate fingerprint is invalid | {0}")]
  Fingerprint(String),
  #[error("Failed to create application credential")]
  Identity(#[from] IdentityError),
  #[error("Issued credential does not fit the connection token")]
  Token(#[from] TokenError),
}

/// Names of the privileged principal and shape of the
/// issued credentials. The password always comes from node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerSettings {
  pub username: String,
  pub user_domain: String,
  pub project: String,
  pub project_domain: String,
  pub role: String,
  pub validity_minutes: u32,
}

impl Default for IssuerSettings {
  fn default() -> Self {
    IssuerSettings {
      username: String::from("nova"),
      user_domain: String::from("default"),
      project: String::from("service"),
      project_domain: String::from("default"),
      role: String::from("reader"),
      validity_minutes: 20,
    }
  }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
  pub token: ConnectionToken,
  /// The printable connection string.
  pub encoded: String,
  pub expires_at: DateTime<Utc>,
  pub validity_minutes: u32,
}

impl IssuedToken {
  /// Shown to the operator alongside the connection string.
  pub fn notice(&self) -> String {
    format!(
      "Use the following connection string to add a new compute node \
      to the cluster (valid for {} minutes from this moment):",
      self.validity_minutes
    )
  }
}

/// Mints join credentials on the control node.
pub struct CredentialIssuer<I> {
  identity: I,
  settings: IssuerSettings,
}

impl<I: IdentityProvider> CredentialIssuer<I> {
  pub fn new(identity: I, settings: IssuerSettings) -> Self {
    CredentialIssuer { identity, settings }
  }

  pub fn settings(&self) -> &IssuerSettings {
    &self.settings
  }

  /// Creates a credential only able to read the identity catalog,
  /// expiring `validity_minutes` after `now`, and packs it
  /// into a connection token. The token is not persisted.
  #[tracing::instrument(name = "IssueJoinToken", skip_all)]
  pub async fn issue_join_token(
    &self,
    config: &dyn ConfigStore,
    now: DateTime<Utc>,
  ) -> Result<IssuedToken, IssueError> {
    let role = config.get_string_opt(keys::CLUSTER_ROLE)?;
    if role.as_deref() != Some(keys::ROLE_CONTROL) {
      return Err(IssueError::Role(role));
    }
    // Everything the token needs is read before anything is minted.
    let hostname = config.get_string(keys::NETWORK_CONTROL_IP)?;
    let fingerprint =
      Fingerprint::from_hex(&config.get_string(keys::CLUSTER_FINGERPRINT)?)
        .map_err(|e| IssueError::Fingerprint(format!("{e:#}")))?;
    let principal = ServicePrincipal {
      username: self.settings.username.clone(),
      password: config.get_string(keys::SERVICE_PASSWORD)?,
      user_domain: self.settings.user_domain.clone(),
      project: self.settings.project.clone(),
      project_domain: self.settings.project_domain.clone(),
    };

    let expires_at =
      now + Duration::minutes(self.settings.validity_minutes.into());
    let request = ApplicationCredentialRequest {
      name: format!("cluster-join-{}", uuid::Uuid::new_v4().simple()),
      secret: generate_secret(),
      role: self.settings.role.clone(),
      access_rules: vec![AccessRule::catalog_read()],
      expires_at,
      unrestricted: false,
    };
    let credential = self
      .identity
      .create_application_credential(&principal, request)
      .await?;

    let token = ConnectionToken::new(
      hostname,
      fingerprint.as_bytes(),
      credential.id,
      credential.secret,
    )?;
    tracing::info!(
      "Issued join credential {} | expires: {}",
      token.credential_id(),
      credential.expires_at
    );
    Ok(IssuedToken {
      encoded: token.encode(),
      token,
      expires_at: credential.expires_at,
      validity_minutes: self.settings.validity_minutes,
    })
  }
}

/// URL safe characters from 32 random bytes,
/// cut to the token's secret length.
fn generate_secret() -> String {
  let mut secret = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
  secret.truncate(CREDENTIAL_SECRET_LEN);
  secret
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use identity::ApplicationCredential;
  use node_config::MemoryConfigStore;
  use serde_json::json;

  use super::*;

  #[derive(Default)]
  struct Recorder {
    requests: Mutex<Vec<(ServicePrincipal, ApplicationCredentialRequest)>>,
  }

  impl IdentityProvider for Recorder {
    async fn create_application_credential(
      &self,
      principal: &ServicePrincipal,
      request: ApplicationCredentialRequest,
    ) -> Result<ApplicationCredential, IdentityError> {
      self
        .requests
        .lock()
        .unwrap()
        .push((principal.clone(), request.clone()));
      Ok(ApplicationCredential {
        id: String::from("0123456789abcdef0123456789abcdef"),
        name: request.name,
        secret: request.secret,
        expires_at: request.expires_at,
      })
    }

    async fn verify_application_credential(
      &self,
      _id: &str,
      _secret: &str,
    ) -> Result<(), IdentityError> {
      Ok(())
    }
  }

  fn control_config() -> MemoryConfigStore {
    MemoryConfigStore::new(json!({
      "config": {
        "cluster": {
          "role": "control",
          "fingerprint": "ab".repeat(32),
        },
        "network": { "control-ip": "10.20.20.10" },
        "credentials": { "nova-password": "nova-pw" },
      }
    }))
  }

  #[test]
  fn secrets_are_url_safe_and_sized() {
    let secret = generate_secret();
    assert_eq!(secret.len(), CREDENTIAL_SECRET_LEN);
    assert!(
      secret
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    );
    assert_ne!(secret, generate_secret());
  }

  #[tokio::test]
  async fn issues_scoped_token() {
    let issuer =
      CredentialIssuer::new(Recorder::default(), IssuerSettings::default());
    let now = Utc::now();
    let issued = issuer
      .issue_join_token(&control_config(), now)
      .await
      .unwrap();

    let decoded = ConnectionToken::decode(&issued.encoded).unwrap();
    assert_eq!(decoded, issued.token);
    assert_eq!(decoded.hostname(), "10.20.20.10");
    assert_eq!(decoded.fingerprint(), &[0xab; 32]);
    assert_eq!(issued.expires_at, now + Duration::minutes(20));
    assert!(issued.notice().contains("valid for 20 minutes"));

    let requests = issuer.identity.requests.lock().unwrap();
    let (principal, request) = &requests[0];
    assert_eq!(principal.username, "nova");
    assert_eq!(principal.password, "nova-pw");
    assert_eq!(principal.project, "service");
    assert_eq!(request.role, "reader");
    assert_eq!(request.access_rules, vec![AccessRule::catalog_read()]);
    assert!(!request.unrestricted);
    assert!(request.name.starts_with("cluster-join-"));
    assert_eq!(request.name.len(), "cluster-join-".len() + 32);
  }

  #[tokio::test]
  async fn compute_node_cannot_issue() {
    let config = control_config();
    config
      .set(keys::CLUSTER_ROLE, json!(keys::ROLE_COMPUTE))
      .unwrap();
    let issuer =
      CredentialIssuer::new(Recorder::default(), IssuerSettings::default());
    let res = issuer.issue_join_token(&config, Utc::now()).await;
    assert!(matches!(res, Err(IssueError::Role(Some(_)))));
    assert!(issuer.identity.requests.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn missing_fingerprint_mints_nothing() {
    let config = MemoryConfigStore::new(json!({
      "config": {
        "cluster": { "role": "control" },
        "network": { "control-ip": "10.20.20.10" },
        "credentials": { "nova-password": "nova-pw" },
      }
    }));
    let issuer =
      CredentialIssuer::new(Recorder::default(), IssuerSettings::default());
    let res = issuer.issue_join_token(&config, Utc::now()).await;
    assert!(matches!(
      res,
      Err(IssueError::Config(ConfigError::Missing(_)))
    ));
    assert!(issuer.identity.requests.lock().unwrap().is_empty());
  }
}
