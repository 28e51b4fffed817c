//! The join service.
//!
//! Each `POST /join` passes through, in order:
//! 1. API version negotiation
//! 2. Content type and JSON body checks
//! 3. Credential presence / format checks
//! 4. Authentication of the credential against the identity provider
//!
//! and only then receives the node configuration snapshot.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
  Json, Router,
  body::Bytes,
  extract::State,
  http::{HeaderMap, header::CONTENT_TYPE},
  routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use cluster_client::entities::{
  API_VERSION, API_VERSION_HEADER, ApiVersion, CREDENTIAL_ID_FIELD,
  CREDENTIAL_SECRET_FIELD, JoinResponse, StatusResponse,
};
use identity::{IdentityError, IdentityProvider};
use node_config::ConfigStore;
use serde_json::Value;

mod error;

pub use error::ApiError;

pub struct JoinState<I> {
  pub identity: I,
  pub config: Arc<dyn ConfigStore>,
}

pub fn router<I: IdentityProvider>(state: Arc<JoinState<I>>) -> Router {
  Router::new()
    .route("/", get(status))
    .route("/join", post(join::<I>))
    .with_state(state)
}

/// Serves the join service over TLS until the handle is shut down.
pub async fn serve<I: IdentityProvider>(
  state: Arc<JoinState<I>>,
  addr: SocketAddr,
  tls: rustls::ServerConfig,
  handle: Handle,
) -> anyhow::Result<()> {
  let app = router(state);
  let tls = RustlsConfig::from_config(Arc::new(tls));
  tracing::info!("Cluster join service starting on https://{addr}");
  axum_server::bind_rustls(addr, tls)
    .handle(handle)
    .serve(app.into_make_service())
    .await
    .context("Cluster join service failed")
}

async fn status() -> Json<StatusResponse> {
  Json(StatusResponse {
    status: String::from("running"),
    info: String::from("MicroStack clustering daemon."),
  })
}

#[tracing::instrument(name = "Join", level = "debug", skip_all)]
async fn join<I: IdentityProvider>(
  State(state): State<Arc<JoinState<I>>>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<JoinResponse>, ApiError> {
  check_api_version(&headers)?;
  let body = parse_json_body(&headers, &body)?;
  let (id, secret) = credentials(&body)?;

  match state.identity.verify_application_credential(id, secret).await {
    Ok(()) => {}
    Err(IdentityError::Unauthorized(e)) => {
      tracing::warn!("Join credential {id} was rejected | {e}");
      return Err(ApiError::AuthorizationFailed);
    }
    Err(e) => {
      return Err(ApiError::unexpected(
        "Failed to verify join credential",
        e,
      ));
    }
  }

  // File backed stores read from disk.
  let store = state.config.clone();
  let config = tokio::task::spawn_blocking(move || store.snapshot())
    .await
    .map_err(|e| ApiError::unexpected("Node config read panicked", e))?
    .map_err(|e| {
      ApiError::unexpected("Failed to read node config", e)
    })?;
  tracing::info!("Credential {id} joined the cluster");
  Ok(Json(JoinResponse { config }))
}

fn check_api_version(headers: &HeaderMap) -> Result<ApiVersion, ApiError> {
  let Some(value) = headers.get(API_VERSION_HEADER) else {
    tracing::debug!("Request is missing the API version header");
    return Err(ApiError::ApiVersionMissing);
  };
  let version = value
    .to_str()
    .ok()
    .and_then(|value| value.parse::<ApiVersion>().ok())
    .ok_or_else(|| {
      tracing::debug!("Request has an invalid API version: {value:?}");
      ApiError::ApiVersionInvalid
    })?;
  if version.major > API_VERSION.major {
    tracing::debug!("Requested API version {version} not implemented");
    Err(ApiError::ApiVersionNotImplemented)
  } else if version.major < API_VERSION.major {
    tracing::debug!("Requested API version {version} was dropped");
    Err(ApiError::ApiVersionDropped)
  } else {
    Ok(version)
  }
}

/// `application/json` or any `application/*+json`,
/// parameters such as charset are ignored.
fn is_json_content_type(headers: &HeaderMap) -> bool {
  let Some(value) =
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
  else {
    return false;
  };
  let mime = value
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_ascii_lowercase();
  mime == "application/json"
    || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Content type is checked before the body is looked at.
fn parse_json_body(
  headers: &HeaderMap,
  body: &[u8],
) -> Result<Value, ApiError> {
  if !is_json_content_type(headers) {
    tracing::debug!("Request content type is not application/json");
    return Err(ApiError::IncorrectContentType);
  }
  serde_json::from_slice(body).map_err(|e| {
    tracing::debug!("Request has invalid JSON | {e}");
    ApiError::InvalidJsonInRequest
  })
}

/// Absent, null and empty values count as missing,
/// any other non string value is malformed.
fn credentials(body: &Value) -> Result<(&str, &str), ApiError> {
  fn field<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body
      .get(name)
      .filter(|value| !value.is_null())
      .filter(|value| value.as_str() != Some(""))
  }
  let (Some(id), Some(secret)) = (
    field(body, CREDENTIAL_ID_FIELD),
    field(body, CREDENTIAL_SECRET_FIELD),
  ) else {
    tracing::debug!("Request is missing authentication data");
    return Err(ApiError::MissingAuthDataInRequest);
  };
  match (id.as_str(), secret.as_str()) {
    (Some(id), Some(secret)) => Ok((id, secret)),
    _ => {
      tracing::debug!("Request has malformed authentication data");
      Err(ApiError::InvalidAuthDataFormatInRequest)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
  };
  use identity::{
    ApplicationCredential, ApplicationCredentialRequest,
    ServicePrincipal,
  };
  use node_config::MemoryConfigStore;
  use serde_json::json;
  use tower::ServiceExt;

  use super::*;

  const ID: &str = "0123456789abcdef0123456789abcdef";
  const SECRET: &str = "abcdefghijklmnopqrstuvwxyz012345";

  /// Accepts exactly one credential, or fails like an unreachable
  /// identity provider.
  struct Fixed {
    reachable: bool,
    calls: Mutex<usize>,
  }

  impl IdentityProvider for Fixed {
    async fn create_application_credential(
      &self,
      _principal: &ServicePrincipal,
      _request: ApplicationCredentialRequest,
    ) -> Result<ApplicationCredential, IdentityError> {
      Err(IdentityError::InvalidInput(String::from("unused")))
    }

    async fn verify_application_credential(
      &self,
      id: &str,
      secret: &str,
    ) -> Result<(), IdentityError> {
      *self.calls.lock().unwrap() += 1;
      if !self.reachable {
        return Err(IdentityError::Protocol(String::from(
          "catalog read | 503 Service Unavailable",
        )));
      }
      if id == ID && secret == SECRET {
        Ok(())
      } else {
        Err(IdentityError::Unauthorized(String::from("expired")))
      }
    }
  }

  fn state(reachable: bool) -> Arc<JoinState<Fixed>> {
    Arc::new(JoinState {
      identity: Fixed {
        reachable,
        calls: Mutex::new(0),
      },
      config: Arc::new(MemoryConfigStore::new(json!({
        "config": {
          "network": { "control-ip": "10.20.20.10" },
          "credentials": { "nova-password": "pw" },
        }
      }))),
    })
  }

  fn request(
    version: Option<&str>,
    content_type: Option<&str>,
    body: impl Into<Body>,
  ) -> Request<Body> {
    let mut builder = Request::post("/join");
    if let Some(version) = version {
      builder = builder.header(API_VERSION_HEADER, version);
    }
    if let Some(content_type) = content_type {
      builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder.body(body.into()).unwrap()
  }

  fn join_body() -> String {
    json!({ CREDENTIAL_ID_FIELD: ID, CREDENTIAL_SECRET_FIELD: SECRET })
      .to_string()
  }

  async fn send(
    state: Arc<JoinState<Fixed>>,
    request: Request<Body>,
  ) -> (StatusCode, Value) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
  }

  fn message(error: ApiError) -> Value {
    json!({ "message": error.to_string() })
  }

  #[tokio::test]
  async fn status_endpoint() {
    let response = router(state(true))
      .oneshot(Request::get("/").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(
      serde_json::from_slice::<Value>(&body).unwrap(),
      json!({ "status": "running", "info": "MicroStack clustering daemon." })
    );
  }

  #[tokio::test]
  async fn version_policy() {
    for (version, status, error) in [
      (None, 400, Some(ApiError::ApiVersionMissing)),
      (Some("abc"), 400, Some(ApiError::ApiVersionInvalid)),
      (Some("0.1.0"), 410, Some(ApiError::ApiVersionDropped)),
      (Some("2.0.0"), 501, Some(ApiError::ApiVersionNotImplemented)),
      (Some("1.0.0"), 200, None),
      (Some("1.7.2-beta"), 200, None),
    ] {
      let (got, body) = send(
        state(true),
        request(version, Some("application/json"), join_body()),
      )
      .await;
      assert_eq!(got.as_u16(), status, "{version:?}");
      if let Some(error) = error {
        assert_eq!(body, message(error));
      }
    }
  }

  #[tokio::test]
  async fn content_type_is_checked_before_json() {
    let (status, body) = send(
      state(true),
      request(Some("1.0.0"), Some("text/plain"), "not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, message(ApiError::IncorrectContentType));

    let (status, body) =
      send(state(true), request(Some("1.0.0"), None, join_body())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, message(ApiError::IncorrectContentType));
  }

  #[tokio::test]
  async fn invalid_json() {
    for body in ["not json", "", "{\"credential-id\": "] {
      let (status, response) = send(
        state(true),
        request(Some("1.0.0"), Some("application/json"), body),
      )
      .await;
      assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
      assert_eq!(response, message(ApiError::InvalidJsonInRequest));
    }
  }

  #[tokio::test]
  async fn missing_and_malformed_credentials() {
    let cases = [
      (json!({}), ApiError::MissingAuthDataInRequest),
      (json!([ID, SECRET]), ApiError::MissingAuthDataInRequest),
      (
        json!({ CREDENTIAL_ID_FIELD: ID }),
        ApiError::MissingAuthDataInRequest,
      ),
      (
        json!({ CREDENTIAL_ID_FIELD: "", CREDENTIAL_SECRET_FIELD: SECRET }),
        ApiError::MissingAuthDataInRequest,
      ),
      (
        json!({ CREDENTIAL_ID_FIELD: ID, CREDENTIAL_SECRET_FIELD: null }),
        ApiError::MissingAuthDataInRequest,
      ),
      (
        json!({ CREDENTIAL_ID_FIELD: 42, CREDENTIAL_SECRET_FIELD: SECRET }),
        ApiError::InvalidAuthDataFormatInRequest,
      ),
      (
        json!({ CREDENTIAL_ID_FIELD: ID, CREDENTIAL_SECRET_FIELD: [1] }),
        ApiError::InvalidAuthDataFormatInRequest,
      ),
    ];
    for (body, error) in cases {
      let state = state(true);
      let (status, response) = send(
        state.clone(),
        request(
          Some("1.0.0"),
          Some("application/json; charset=utf-8"),
          body.to_string(),
        ),
      )
      .await;
      assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
      assert_eq!(response, message(error), "{body}");
      // Rejected before reaching the identity provider.
      assert_eq!(*state.identity.calls.lock().unwrap(), 0);
    }
  }

  #[tokio::test]
  async fn rejected_credential_is_unauthorized() {
    let body = json!({
      CREDENTIAL_ID_FIELD: ID,
      CREDENTIAL_SECRET_FIELD: "wrong-secret-wrong-secret-wrong-",
    });
    let (status, response) = send(
      state(true),
      request(Some("1.0.0"), Some("application/json"), body.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response, message(ApiError::AuthorizationFailed));
  }

  #[tokio::test]
  async fn identity_failure_is_generic_500() {
    let (status, response) = send(
      state(false),
      request(Some("1.0.0"), Some("application/json"), join_body()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response, message(ApiError::UnexpectedError));
    assert!(!response.to_string().contains("503"));
  }

  #[tokio::test]
  async fn success_returns_config_snapshot() {
    let (status, response) = send(
      state(true),
      request(Some("1.0.0"), Some("application/json"), join_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
      response,
      json!({
        "config": {
          "network": { "control-ip": "10.20.20.10" },
          "credentials": { "nova-password": "pw" },
        }
      })
    );
  }

  #[tokio::test]
  async fn file_backed_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let file_state = |path: &std::path::Path| {
      Arc::new(JoinState {
        identity: Fixed {
          reachable: true,
          calls: Mutex::new(0),
        },
        config: Arc::new(node_config::FileConfigStore::new(path)),
      })
    };

    std::fs::write(
      &path,
      json!({ "config": { "network": { "control-ip": "10.0.0.9" } } })
        .to_string(),
    )
    .unwrap();
    let (status, response) = send(
      file_state(&path),
      request(Some("1.0.0"), Some("application/json"), join_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
      response,
      json!({ "config": { "network": { "control-ip": "10.0.0.9" } } })
    );

    std::fs::write(&path, "{ not json").unwrap();
    let (status, response) = send(
      file_state(&path),
      request(Some("1.0.0"), Some("application/json"), join_body()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response, message(ApiError::UnexpectedError));
  }

  #[test]
  fn json_content_types() {
    let mut headers = HeaderMap::new();
    for (value, expected) in [
      ("application/json", true),
      ("Application/JSON; charset=utf-8", true),
      ("application/merge-patch+json", true),
      ("text/plain", false),
      ("application/jsonx", false),
    ] {
      headers.insert(CONTENT_TYPE, value.parse().unwrap());
      assert_eq!(is_json_content_type(&headers), expected, "{value}");
    }
  }
}
