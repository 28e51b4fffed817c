//! The connection token handed from the control node to an operator,
//! and from the operator to the joining node.
//!
//! ```markdown
//! base64( msgpack map {
//!   hostname:    str,
//!   fingerprint: bin(32),
//!   id:          str(32),
//!   secret:      str(32),
//! })
//! ```
//!
//! A [ConnectionToken] can only be obtained through validation,
//! so holders may assume every field is well formed.

use std::io::Cursor;

use base64::{
  Engine as _,
  alphabet,
  engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::{
  Deserialize, Deserializer, Serialize,
  de::{MapAccess, Visitor, value::MapAccessDeserializer},
};

mod error;
mod validate;

pub use error::*;

/// Length of a SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 32;
/// Credential ids are UUIDs (rfc4122) without dashes.
pub const CREDENTIAL_ID_LEN: usize = 32;
/// Secret length chosen by the issuer.
pub const CREDENTIAL_SECRET_LEN: usize = 32;

/// Standard alphabet. Padding is emitted on encode but optional on decode,
/// operators sometimes lose trailing '=' when copying.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionToken {
  hostname: String,
  fingerprint: [u8; FINGERPRINT_LEN],
  credential_id: String,
  credential_secret: String,
}

impl std::fmt::Debug for ConnectionToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionToken")
      .field("hostname", &self.hostname)
      .field("fingerprint", &hex::encode(self.fingerprint))
      .field("credential_id", &self.credential_id)
      .field("credential_secret", &"<redacted>")
      .finish()
  }
}

#[derive(Serialize)]
struct WireToken<'a> {
  hostname: &'a str,
  fingerprint: &'a serde_bytes::Bytes,
  id: &'a str,
  secret: &'a str,
}

/// Every field optional so missing fields get
/// field specific errors rather than a generic format error.
#[derive(Deserialize)]
struct RawToken {
  hostname: Option<String>,
  fingerprint: Option<serde_bytes::ByteBuf>,
  id: Option<String>,
  secret: Option<String>,
}

/// Derived struct impls also accept a msgpack array,
/// the token body must be a map.
struct MapOnly;

impl<'de> Visitor<'de> for MapOnly {
  type Value = RawToken;

  fn expecting(
    &self,
    f: &mut std::fmt::Formatter<'_>,
  ) -> std::fmt::Result {
    f.write_str("a connection token map")
  }

  fn visit_map<A: MapAccess<'de>>(
    self,
    map: A,
  ) -> Result<RawToken, A::Error> {
    RawToken::deserialize(MapAccessDeserializer::new(map))
  }
}

impl ConnectionToken {
  /// Validates all fields, the same as a decoded token would be.
  pub fn new(
    hostname: impl Into<String>,
    fingerprint: &[u8],
    credential_id: impl Into<String>,
    credential_secret: impl Into<String>,
  ) -> Result<ConnectionToken, TokenError> {
    let hostname = hostname.into();
    let credential_id = credential_id.into();
    let credential_secret = credential_secret.into();
    validate::hostname(&hostname)?;
    let fingerprint = validate::fingerprint(fingerprint)?;
    validate::credential_id(&credential_id)?;
    validate::credential_secret(&credential_secret)?;
    Ok(ConnectionToken {
      hostname,
      fingerprint,
      credential_id,
      credential_secret,
    })
  }

  /// Decodes and validates an operator supplied token.
  /// Surrounding whitespace is ignored.
  pub fn decode(token: &str) -> Result<ConnectionToken, TokenError> {
    let token = token.trim();
    if !token.is_ascii() {
      return Err(TokenError::Encoding(EncodingError::NonAscii));
    }
    let bytes = TOKEN_ENGINE
      .decode(token)
      .map_err(|e| TokenError::Encoding(EncodingError::Base64(e)))?;

    let mut cursor = Cursor::new(bytes.as_slice());
    let raw = {
      let mut deserializer = rmp_serde::Deserializer::new(&mut cursor);
      (&mut deserializer)
        .deserialize_map(MapOnly)
        .map_err(|e| TokenError::Format(FormatError::Invalid(e)))?
    };
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
      return Err(TokenError::Format(FormatError::ExtraData {
        extra: bytes.len() - consumed,
      }));
    }

    let hostname = raw.hostname.ok_or_else(|| {
      TokenError::missing(TokenField::Hostname)
    })?;
    let fingerprint = raw.fingerprint.ok_or_else(|| {
      TokenError::missing(TokenField::Fingerprint)
    })?;
    let credential_id = raw
      .id
      .ok_or_else(|| TokenError::missing(TokenField::CredentialId))?;
    let credential_secret = raw.secret.ok_or_else(|| {
      TokenError::missing(TokenField::CredentialSecret)
    })?;

    ConnectionToken::new(
      hostname,
      &fingerprint,
      credential_id,
      credential_secret,
    )
  }

  /// Produces the printable token.
  pub fn encode(&self) -> String {
    let wire = WireToken {
      hostname: &self.hostname,
      fingerprint: serde_bytes::Bytes::new(&self.fingerprint),
      id: &self.credential_id,
      secret: &self.credential_secret,
    };
    // Serializing a struct of strings and bytes into a Vec is infallible.
    let bytes = rmp_serde::to_vec_named(&wire)
      .expect("token serialization cannot fail");
    TOKEN_ENGINE.encode(bytes)
  }

  pub fn hostname(&self) -> &str {
    &self.hostname
  }

  pub fn fingerprint(&self) -> &[u8; FINGERPRINT_LEN] {
    &self.fingerprint
  }

  /// Lowercase hex, the form stored in node config.
  pub fn fingerprint_hex(&self) -> String {
    hex::encode(self.fingerprint)
  }

  pub fn credential_id(&self) -> &str {
    &self.credential_id
  }

  pub fn credential_secret(&self) -> &str {
    &self.credential_secret
  }
}
