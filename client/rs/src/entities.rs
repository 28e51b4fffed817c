use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Port the join service listens on.
pub const CLUSTER_SERVICE_PORT: u16 = 10002;

/// Mandatory request header carrying the semantic version
/// of the join API the client speaks.
pub const API_VERSION_HEADER: &str = "API-Version";

/// Join API version implemented by this crate.
pub const API_VERSION: ApiVersion = ApiVersion {
  major: 1,
  minor: 0,
  patch: 0,
};

pub const CREDENTIAL_ID_FIELD: &str = "credential-id";
pub const CREDENTIAL_SECRET_FIELD: &str = "credential-secret";

/// Body of `POST /join`.
#[derive(Serialize, Deserialize, Clone)]
pub struct JoinRequest {
  #[serde(rename = "credential-id")]
  pub credential_id: String,
  #[serde(rename = "credential-secret")]
  pub credential_secret: String,
}

impl std::fmt::Debug for JoinRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JoinRequest")
      .field("credential_id", &self.credential_id)
      .field("credential_secret", &"<redacted>")
      .finish()
  }
}

/// Successful `POST /join`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinResponse {
  /// The control node configuration snapshot.
  pub config: Value,
}

/// Body of every non 200 response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
  pub message: String,
}

/// `GET /`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
  pub status: String,
  pub info: String,
}

/// `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`.
/// Only the major component is used for compatibility decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid API version {0:?}")]
pub struct InvalidApiVersion(pub String);

impl FromStr for ApiVersion {
  type Err = InvalidApiVersion;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let invalid = || InvalidApiVersion(value.to_string());
    let (rest, build) = match value.split_once('+') {
      Some((rest, build)) => (rest, Some(build)),
      None => (value, None),
    };
    let (core, pre) = match rest.split_once('-') {
      Some((core, pre)) => (core, Some(pre)),
      None => (rest, None),
    };
    if !build.is_none_or(valid_identifiers)
      || !pre.is_none_or(valid_identifiers)
    {
      return Err(invalid());
    }
    let mut parts = core.split('.');
    let (Some(major), Some(minor), Some(patch), None) =
      (parts.next(), parts.next(), parts.next(), parts.next())
    else {
      return Err(invalid());
    };
    Ok(ApiVersion {
      major: numeric(major).ok_or_else(invalid)?,
      minor: numeric(minor).ok_or_else(invalid)?,
      patch: numeric(patch).ok_or_else(invalid)?,
    })
  }
}

impl std::fmt::Display for ApiVersion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

/// Digits only, no leading zero.
fn numeric(part: &str) -> Option<u64> {
  if part.is_empty()
    || !part.bytes().all(|b| b.is_ascii_digit())
    || (part.len() > 1 && part.starts_with('0'))
  {
    return None;
  }
  part.parse().ok()
}

/// Dot separated, non empty, `[0-9A-Za-z-]`.
fn valid_identifiers(value: &str) -> bool {
  value.split('.').all(|ident| {
    !ident.is_empty()
      && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
  })
}
