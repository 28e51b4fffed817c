use std::{net::IpAddr, sync::OnceLock};

use regex::Regex;

use crate::{
  CREDENTIAL_ID_LEN, CREDENTIAL_SECRET_LEN, FINGERPRINT_LEN,
  TokenError, TokenField,
};

/// rfc1035 section 3.1: 253 visible characters, without the trailing dot.
const MAX_HOSTNAME_LEN: usize = 253;

fn label_regex() -> &'static Regex {
  static LABEL: OnceLock<Regex> = OnceLock::new();
  LABEL.get_or_init(|| {
    Regex::new(r"(?i)^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$")
      .expect("label regex is valid")
  })
}

/// IPv4 / IPv6 literals are accepted as is,
/// anything else must be a valid DNS hostname.
pub fn hostname(hostname: &str) -> Result<(), TokenError> {
  if hostname.parse::<IpAddr>().is_ok() {
    return Ok(());
  }
  dns_name(hostname)
    .map_err(|reason| TokenError::invalid(TokenField::Hostname, reason))
}

fn dns_name(hostname: &str) -> Result<(), String> {
  if hostname.is_empty() {
    return Err(String::from("an empty hostname is invalid"));
  }
  let name = hostname.strip_suffix('.').unwrap_or(hostname);
  if name.chars().count() > MAX_HOSTNAME_LEN {
    return Err(format!(
      "the specified hostname is longer than {MAX_HOSTNAME_LEN} characters"
    ));
  }
  let labels = name.split('.').collect::<Vec<_>>();
  let tld = labels.last().copied().unwrap_or_default();
  if !tld.chars().any(|c| c.is_ascii_alphabetic() || c == '-') {
    return Err(format!(
      "{hostname} contains no non-numeric characters in the top-level domain part"
    ));
  }
  if labels.iter().any(|label| !label_regex().is_match(label)) {
    return Err(format!("{hostname} is an invalid hostname"));
  }
  Ok(())
}

pub fn fingerprint(
  fingerprint: &[u8],
) -> Result<[u8; FINGERPRINT_LEN], TokenError> {
  fingerprint.try_into().map_err(|_| {
    TokenError::invalid(
      TokenField::Fingerprint,
      format!(
        "invalid length: {}, expected: {FINGERPRINT_LEN}",
        fingerprint.len()
      ),
    )
  })
}

pub fn credential_id(credential_id: &str) -> Result<(), TokenError> {
  exact_len(TokenField::CredentialId, credential_id, CREDENTIAL_ID_LEN)
}

pub fn credential_secret(
  credential_secret: &str,
) -> Result<(), TokenError> {
  exact_len(
    TokenField::CredentialSecret,
    credential_secret,
    CREDENTIAL_SECRET_LEN,
  )
}

fn exact_len(
  field: TokenField,
  value: &str,
  expected: usize,
) -> Result<(), TokenError> {
  let actual = value.chars().count();
  if actual == expected {
    Ok(())
  } else {
    Err(TokenError::invalid(
      field,
      format!("unexpected length: {actual}, expected: {expected}"),
    ))
  }
}
