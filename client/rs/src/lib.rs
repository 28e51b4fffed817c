//! # Cluster join client
//!
//! Joins this node to a cluster using the connection token
//! printed by `add-compute` on the control node.
//!
//! ```no_run
//! # async fn join(
//! #   config: &dyn node_config::ConfigStore,
//! # ) -> Result<(), cluster_client::JoinError> {
//! let outcome = cluster_client::JoinClient::default()
//!   .join("gqhob3N0bmFtZa...", config)
//!   .await?;
//! println!("Joined {}", outcome.control_hostname);
//! # Ok(())
//! # }
//! ```
//!
//! Every step is a hard gate. Nothing is written to the local
//! node config unless the whole round trip succeeds.

use std::{net::Ipv6Addr, sync::Arc, time::Duration};

use node_config::{ConfigError, ConfigStore, keys};
use reqwest::StatusCode;
use serde_json::Value;
use tls::{Fingerprint, FingerprintMismatch, PinnedCertVerifier};
use token::{ConnectionToken, TokenError};

pub mod entities;

use entities::{
  API_VERSION, API_VERSION_HEADER, CLUSTER_SERVICE_PORT, ErrorResponse,
  JoinRequest, JoinResponse,
};

const UNAUTHORIZED_HINT: &str = "Please make sure the connection string was entered as returned by the \"add-compute\" command and that it was used before its expiration time.";

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
  #[error("Invalid connection string")]
  Token(#[from] TokenError),
  #[error(
    "The actual clustering service certificate fingerprint did not match the expected one. \
    Please make sure that (1) a correct connection string was specified \
    and (2) no MITM attack is performed against HTTPS requests (including transparent proxies). \
    | {0}"
  )]
  FingerprintMismatch(FingerprintMismatch),
  #[error("Could not retrieve a response from the clustering service")]
  Connection(#[source] reqwest::Error),
  #[error("An authorization failure has occurred while joining the cluster | {0}")]
  Unauthorized(String),
  #[error(
    "Unexpected response status received from the clustering service: {status}{}",
    .message.as_ref().map(|m| format!(" | {m}")).unwrap_or_default()
  )]
  UnexpectedServerResponse {
    status: StatusCode,
    message: Option<String>,
  },
  #[error(
    "The response from the clustering service is empty which is unexpected. \
    Please check its status and file an issue if the problem persists."
  )]
  EmptyResponse,
  #[error("The response from the clustering service is invalid | {0}")]
  InvalidResponseEncoding(String),
  #[error("Failed to set up the join request | {0}")]
  Setup(String),
  #[error("Failed to apply the cluster config")]
  Config(#[from] ConfigError),
}

/// What a successful join changed locally.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
  pub control_hostname: String,
  pub control_ip: Value,
  /// Every node config key written.
  pub applied: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JoinClient {
  port: u16,
  connect_timeout: Duration,
  timeout: Duration,
}

impl Default for JoinClient {
  fn default() -> Self {
    JoinClient {
      port: CLUSTER_SERVICE_PORT,
      connect_timeout: Duration::from_secs(10),
      timeout: Duration::from_secs(30),
    }
  }
}

impl JoinClient {
  pub fn with_port(mut self, port: u16) -> JoinClient {
    self.port = port;
    self
  }

  pub fn with_timeouts(
    mut self,
    connect_timeout: Duration,
    timeout: Duration,
  ) -> JoinClient {
    self.connect_timeout = connect_timeout;
    self.timeout = timeout;
    self
  }

  #[tracing::instrument(level = "debug", skip_all)]
  pub async fn join(
    &self,
    connection_string: &str,
    config: &dyn ConfigStore,
  ) -> Result<JoinOutcome, JoinError> {
    let token = ConnectionToken::decode(connection_string)?;
    let verifier = PinnedCertVerifier::new(Fingerprint::from_bytes(
      *token.fingerprint(),
    ));
    let http = self.http_client(verifier.clone())?;
    let url = join_url(token.hostname(), self.port);
    tracing::debug!("Joining cluster at {url}");

    let response = http
      .post(&url)
      .header(API_VERSION_HEADER, API_VERSION.to_string())
      .json(&JoinRequest {
        credential_id: token.credential_id().to_string(),
        credential_secret: token.credential_secret().to_string(),
      })
      .send()
      .await
      .map_err(|e| match verifier.mismatch() {
        Some(mismatch) => JoinError::FingerprintMismatch(mismatch),
        None => JoinError::Connection(e),
      })?;

    let status = response.status();
    let body = response.bytes().await.map_err(JoinError::Connection)?;

    if status == StatusCode::UNAUTHORIZED {
      let message = error_message(&body)
        .map(|message| format!("{message} | {UNAUTHORIZED_HINT}"))
        .unwrap_or_else(|| UNAUTHORIZED_HINT.to_string());
      return Err(JoinError::Unauthorized(message));
    }
    if status != StatusCode::OK {
      return Err(JoinError::UnexpectedServerResponse {
        status,
        message: error_message(&body),
      });
    }
    if body.is_empty() {
      return Err(JoinError::EmptyResponse);
    }
    let response: JoinResponse = serde_json::from_slice(&body)
      .map_err(|e| JoinError::InvalidResponseEncoding(e.to_string()))?;

    let entries = config_entries(&token, &response.config)?;
    let applied = entries.iter().map(|(key, _)| key.clone()).collect();
    let control_ip = response.config["network"]["control-ip"].clone();
    config.set_many(entries)?;

    tracing::info!("Joined cluster at {}", token.hostname());
    Ok(JoinOutcome {
      control_hostname: token.hostname().to_string(),
      control_ip,
      applied,
    })
  }

  fn http_client(
    &self,
    verifier: Arc<PinnedCertVerifier>,
  ) -> Result<reqwest::Client, JoinError> {
    let tls = tls::pinned_client_config(verifier)
      .map_err(|e| JoinError::Setup(format!("{e:#}")))?;
    reqwest::Client::builder()
      .use_preconfigured_tls(tls)
      .connect_timeout(self.connect_timeout)
      .timeout(self.timeout)
      .build()
      .map_err(|e| JoinError::Setup(e.to_string()))
  }
}

fn join_url(hostname: &str, port: u16) -> String {
  if hostname.parse::<Ipv6Addr>().is_ok() {
    format!("https://[{hostname}]:{port}/join")
  } else {
    format!("https://{hostname}:{port}/join")
  }
}

fn error_message(body: &[u8]) -> Option<String> {
  serde_json::from_slice::<ErrorResponse>(body)
    .ok()
    .map(|e| e.message)
}

/// Credentials and control ip from the response,
/// plus the token fields under `config.cluster`.
fn config_entries(
  token: &ConnectionToken,
  config: &Value,
) -> Result<Vec<(String, Value)>, JoinError> {
  let credentials = config
    .get("credentials")
    .and_then(Value::as_object)
    .ok_or_else(|| {
      JoinError::InvalidResponseEncoding(String::from(
        "config.credentials is missing",
      ))
    })?;
  let control_ip = config
    .get("network")
    .and_then(|network| network.get("control-ip"))
    .filter(|ip| !ip.is_null())
    .ok_or_else(|| {
      JoinError::InvalidResponseEncoding(String::from(
        "config.network.control-ip is missing",
      ))
    })?;

  let mut entries = credentials
    .iter()
    .map(|(key, value)| {
      (format!("{}.{key}", keys::CREDENTIALS_PREFIX), value.clone())
    })
    .collect::<Vec<_>>();
  entries.push((keys::NETWORK_CONTROL_IP.to_string(), control_ip.clone()));
  entries.extend([
    (
      keys::CLUSTER_HOSTNAME.to_string(),
      Value::from(token.hostname()),
    ),
    (
      keys::CLUSTER_FINGERPRINT.to_string(),
      Value::from(token.fingerprint_hex()),
    ),
    (
      keys::CLUSTER_CREDENTIAL_ID.to_string(),
      Value::from(token.credential_id()),
    ),
    (
      keys::CLUSTER_CREDENTIAL_SECRET.to_string(),
      Value::from(token.credential_secret()),
    ),
  ]);
  Ok(entries)
}

#[cfg(test)]
mod tests {
  use node_config::MemoryConfigStore;
  use serde_json::json;

  use super::*;

  const ID: &str = "0123456789abcdef0123456789abcdef";
  const SECRET: &str = "abcdefghijklmnopqrstuvwxyz012345";

  fn token() -> ConnectionToken {
    ConnectionToken::new("10.20.20.10", &[3u8; 32], ID, SECRET).unwrap()
  }

  #[test]
  fn ipv6_hosts_are_bracketed() {
    assert_eq!(
      join_url("fd00::1", 10002),
      "https://[fd00::1]:10002/join"
    );
    assert_eq!(
      join_url("10.0.0.1", 10002),
      "https://10.0.0.1:10002/join"
    );
    assert_eq!(
      join_url("control.lan", 1),
      "https://control.lan:1/join"
    );
  }

  #[test]
  fn entries_cover_credentials_network_and_token() {
    let config = json!({
      "credentials": {
        "nova-password": "n",
        "keystone-password": "k",
      },
      "network": { "control-ip": "10.20.20.10" },
      "cluster": { "role": "control" },
    });
    let entries = config_entries(&token(), &config).unwrap();
    let store = MemoryConfigStore::default();
    store.set_many(entries).unwrap();

    assert_eq!(
      store.get_string("config.credentials.nova-password").unwrap(),
      "n"
    );
    assert_eq!(
      store.get_string("config.credentials.keystone-password").unwrap(),
      "k"
    );
    assert_eq!(
      store.get_string(keys::NETWORK_CONTROL_IP).unwrap(),
      "10.20.20.10"
    );
    assert_eq!(
      store.get_string(keys::CLUSTER_FINGERPRINT).unwrap(),
      "03".repeat(32)
    );
    assert_eq!(store.get_string(keys::CLUSTER_CREDENTIAL_ID).unwrap(), ID);
    // The control node role is not copied.
    assert_eq!(store.get_string_opt(keys::CLUSTER_ROLE).unwrap(), None);
  }

  #[test]
  fn incomplete_response_is_rejected() {
    let res = config_entries(
      &token(),
      &json!({ "network": { "control-ip": "10.0.0.1" } }),
    );
    assert!(matches!(res, Err(JoinError::InvalidResponseEncoding(_))));
    let res =
      config_entries(&token(), &json!({ "credentials": {} }));
    assert!(matches!(res, Err(JoinError::InvalidResponseEncoding(_))));
  }

  #[tokio::test]
  async fn invalid_token_fails_before_any_io() {
    let store = MemoryConfigStore::default();
    let res = JoinClient::default()
      .with_port(1)
      .join("definitely not a token", &store)
      .await;
    assert!(matches!(res, Err(JoinError::Token(_))));
    assert_eq!(store.snapshot().unwrap(), json!({}));
  }

  #[tokio::test]
  async fn wrong_length_token_fields_fail_before_any_io() {
    use base64::Engine as _;

    #[derive(serde::Serialize)]
    struct Wire<'a> {
      hostname: &'a str,
      fingerprint: &'a serde_bytes::Bytes,
      id: &'a str,
      secret: &'a str,
    }

    let listener =
      tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cases = [
      (&[3u8; 31][..], ID, SECRET, token::TokenField::Fingerprint),
      (&[3u8; 32][..], "short", SECRET, token::TokenField::CredentialId),
      (&[3u8; 32][..], ID, "short", token::TokenField::CredentialSecret),
    ];
    for (fingerprint, id, secret, field) in cases {
      let bytes = rmp_serde::to_vec_named(&Wire {
        hostname: "127.0.0.1",
        fingerprint: serde_bytes::Bytes::new(fingerprint),
        id,
        secret,
      })
      .unwrap();
      let encoded =
        base64::engine::general_purpose::STANDARD.encode(bytes);
      let store = MemoryConfigStore::default();
      let res = JoinClient::default()
        .with_port(port)
        .join(&encoded, &store)
        .await;
      match res {
        Err(JoinError::Token(e)) => assert_eq!(e.field(), Some(field)),
        other => panic!("expected token error, got {other:?}"),
      }
      assert_eq!(store.snapshot().unwrap(), json!({}));
    }

    let accepted = tokio::time::timeout(
      Duration::from_millis(200),
      listener.accept(),
    )
    .await;
    assert!(accepted.is_err(), "a connection was made");
  }
}
