use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
  ApplicationCredential, ApplicationCredentialRequest, IdentityError,
  IdentityProvider, ServicePrincipal,
};

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Keystone v3 over its REST API.
#[derive(Debug, Clone)]
pub struct KeystoneClient {
  /// eg `http://localhost:5000/v3`, no trailing slash.
  base_url: String,
  http: reqwest::Client,
}

impl KeystoneClient {
  pub fn new(
    auth_url: &str,
    timeout: Duration,
  ) -> Result<KeystoneClient, IdentityError> {
    let url = Url::parse(auth_url).map_err(|e| {
      IdentityError::InvalidInput(format!(
        "{auth_url:?} is not a valid url | {e}"
      ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(IdentityError::InvalidInput(format!(
        "Unsupported identity url scheme: {}",
        url.scheme()
      )));
    }
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(IdentityError::Connection)?;
    Ok(KeystoneClient {
      base_url: url.as_str().trim_end_matches('/').to_string(),
      http,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{path}", self.base_url)
  }

  /// Project scoped token for the principal.
  /// Returns (token, user id).
  async fn password_token(
    &self,
    principal: &ServicePrincipal,
  ) -> Result<(String, String), IdentityError> {
    let body = json!({
      "auth": {
        "identity": {
          "methods": ["password"],
          "password": {
            "user": {
              "name": principal.username,
              "domain": { "name": principal.user_domain },
              "password": principal.password,
            }
          }
        },
        "scope": {
          "project": {
            "name": principal.project,
            "domain": { "name": principal.project_domain },
          }
        }
      }
    });
    let response = self
      .http
      .post(self.endpoint("auth/tokens"))
      .json(&body)
      .send()
      .await
      .map_err(IdentityError::Connection)?;
    let response = check_status(response, "password auth").await?;
    let token = subject_token(&response)?;
    let body: TokenBody = read_json(response, "password auth").await?;
    Ok((token, body.token.user.id))
  }

  /// Roles are global when they have no domain.
  async fn global_role_id(
    &self,
    token: &str,
    name: &str,
  ) -> Result<String, IdentityError> {
    let response = self
      .http
      .get(self.endpoint("roles"))
      .query(&[("name", name)])
      .header(AUTH_TOKEN_HEADER, token)
      .send()
      .await
      .map_err(IdentityError::Connection)?;
    let response = check_status(response, "role lookup").await?;
    let body: RolesBody = read_json(response, "role lookup").await?;
    body
      .roles
      .into_iter()
      .find(|role| role.name == name && role.domain_id.is_none())
      .map(|role| role.id)
      .ok_or_else(|| {
        IdentityError::Protocol(format!("No global role named {name}"))
      })
  }

  async fn application_credential_token(
    &self,
    id: &str,
    secret: &str,
  ) -> Result<String, IdentityError> {
    let body = json!({
      "auth": {
        "identity": {
          "methods": ["application_credential"],
          "application_credential": {
            "id": id,
            "secret": secret,
          }
        }
      }
    });
    let response = self
      .http
      .post(self.endpoint("auth/tokens"))
      .json(&body)
      .send()
      .await
      .map_err(IdentityError::Connection)?;
    let response =
      check_status(response, "application credential auth").await?;
    subject_token(&response)
  }
}

impl IdentityProvider for KeystoneClient {
  #[tracing::instrument(
    level = "debug",
    skip_all,
    fields(user = %principal.username, name = %request.name)
  )]
  async fn create_application_credential(
    &self,
    principal: &ServicePrincipal,
    request: ApplicationCredentialRequest,
  ) -> Result<ApplicationCredential, IdentityError> {
    let (token, user_id) = self.password_token(principal).await?;
    let role_id = self.global_role_id(&token, &request.role).await?;
    let body = json!({
      "application_credential": {
        "name": request.name,
        "secret": request.secret,
        "expires_at": request
          .expires_at
          .to_rfc3339_opts(SecondsFormat::Micros, true),
        "roles": [{ "id": role_id }],
        "access_rules": request.access_rules,
        "unrestricted": request.unrestricted,
      }
    });
    let response = self
      .http
      .post(
        self.endpoint(&format!("users/{user_id}/application_credentials")),
      )
      .header(AUTH_TOKEN_HEADER, &token)
      .json(&body)
      .send()
      .await
      .map_err(IdentityError::Connection)?;
    let response =
      check_status(response, "application credential create").await?;
    let body: CreatedBody =
      read_json(response, "application credential create").await?;
    let created = body.application_credential;
    let expires_at = created
      .expires_at
      .as_deref()
      .and_then(parse_timestamp)
      .unwrap_or(request.expires_at);
    tracing::debug!(
      "Created application credential {} | expires: {expires_at}",
      created.id
    );
    Ok(ApplicationCredential {
      id: created.id,
      name: created.name.unwrap_or(request.name),
      // Keystone echoes the secret on creation, fall back to
      // the requested one for deployments which do not.
      secret: created.secret.unwrap_or(request.secret),
      expires_at,
    })
  }

  #[tracing::instrument(level = "debug", skip(self, secret))]
  async fn verify_application_credential(
    &self,
    id: &str,
    secret: &str,
  ) -> Result<(), IdentityError> {
    let token = self.application_credential_token(id, secret).await?;
    let response = self
      .http
      .get(self.endpoint("auth/catalog"))
      .header(AUTH_TOKEN_HEADER, &token)
      .send()
      .await
      .map_err(IdentityError::Connection)?;
    check_status(response, "catalog read").await?;
    Ok(())
  }
}

async fn check_status(
  response: Response,
  action: &str,
) -> Result<Response, IdentityError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let text = response.text().await.unwrap_or_default();
  let message = format!("{action} | {status} | {text}");
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
      Err(IdentityError::Unauthorized(message))
    }
    _ => Err(IdentityError::Protocol(message)),
  }
}

fn subject_token(response: &Response) -> Result<String, IdentityError> {
  response
    .headers()
    .get(SUBJECT_TOKEN_HEADER)
    .and_then(|value| value.to_str().ok())
    .map(str::to_string)
    .ok_or_else(|| {
      IdentityError::Protocol(format!(
        "Token response is missing {SUBJECT_TOKEN_HEADER} header"
      ))
    })
}

async fn read_json<T: for<'de> Deserialize<'de>>(
  response: Response,
  action: &str,
) -> Result<T, IdentityError> {
  response.json().await.map_err(|e| {
    IdentityError::Protocol(format!("Invalid {action} response | {e}"))
  })
}

/// Keystone returns naive timestamps which are UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
    return Some(ts.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|ts| ts.and_utc())
}

#[derive(Deserialize)]
struct TokenBody {
  token: TokenInfo,
}

#[derive(Deserialize)]
struct TokenInfo {
  user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
  id: String,
}

#[derive(Deserialize)]
struct RolesBody {
  roles: Vec<Role>,
}

#[derive(Deserialize)]
struct Role {
  id: String,
  name: String,
  #[serde(default)]
  domain_id: Option<String>,
}

#[derive(Deserialize)]
struct CreatedBody {
  application_credential: CreatedCredential,
}

#[derive(Deserialize)]
struct CreatedCredential {
  id: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  secret: Option<String>,
  #[serde(default)]
  expires_at: Option<String>,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn trailing_slash_is_dropped() {
    let client = KeystoneClient::new(
      "http://localhost:5000/v3/",
      Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(client.base_url(), "http://localhost:5000/v3");
    assert_eq!(
      client.endpoint("auth/catalog"),
      "http://localhost:5000/v3/auth/catalog"
    );
  }

  #[test]
  fn invalid_urls_are_rejected() {
    for url in ["localhost:5000", "ftp://localhost/v3", "not a url"] {
      assert!(matches!(
        KeystoneClient::new(url, Duration::from_secs(1)),
        Err(IdentityError::InvalidInput(_))
      ));
    }
  }

  #[test]
  fn naive_and_zoned_timestamps_parse_as_utc() {
    let expected =
      Utc.with_ymd_and_hms(2026, 10, 19, 12, 20, 0).unwrap();
    assert_eq!(
      parse_timestamp("2026-10-19T12:20:00.000000"),
      Some(expected)
    );
    assert_eq!(parse_timestamp("2026-10-19T12:20:00Z"), Some(expected));
    assert_eq!(parse_timestamp("soon"), None);
  }
}
