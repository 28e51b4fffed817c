use std::fmt;

/// The validated token field an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
  Hostname,
  Fingerprint,
  CredentialId,
  CredentialSecret,
}

impl fmt::Display for TokenField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      TokenField::Hostname => "hostname",
      TokenField::Fingerprint => {
        "clustering service TLS certificate fingerprint"
      }
      TokenField::CredentialId => "credential id",
      TokenField::CredentialSecret => "credential secret",
    })
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
  #[error("the connection string contains non-ASCII characters")]
  NonAscii,
  #[error("the connection string is not valid base64 | {0}")]
  Base64(base64::DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
  #[error("the connection string contains {extra} bytes of extra data")]
  ExtraData { extra: usize },
  #[error("the connection string format is invalid | {0}")]
  Invalid(rmp_serde::decode::Error),
}

/// Token errors are always detected locally and are
/// always fixed by re-copying the token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
  #[error(
    "{0}. Please make sure you entered it as returned by the add-compute command"
  )]
  Encoding(EncodingError),
  #[error(
    "{0}. Please make sure you entered it as returned by the add-compute command"
  )]
  Format(FormatError),
  #[error("The {field} provided in the connection string is invalid: {reason}")]
  FieldInvalid { field: TokenField, reason: String },
}

impl TokenError {
  pub(crate) fn invalid(
    field: TokenField,
    reason: impl Into<String>,
  ) -> TokenError {
    TokenError::FieldInvalid {
      field,
      reason: reason.into(),
    }
  }

  pub(crate) fn missing(field: TokenField) -> TokenError {
    TokenError::invalid(field, "it has not been provided")
  }

  /// The offending field, for field validation errors.
  pub fn field(&self) -> Option<TokenField> {
    match self {
      TokenError::FieldInvalid { field, .. } => Some(*field),
      _ => None,
    }
  }
}
