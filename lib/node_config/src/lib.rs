//! Node configuration store.
//!
//! Configuration is a single JSON document addressed by dotted keys,
//! eg `config.cluster.fingerprint`. Every component receives the store
//! it should use instead of reaching for process-wide state.

use serde_json::{Map, Value};

mod file;
pub mod keys;
mod memory;

pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to access node config at {path}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Node config at {path} is not valid JSON")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Failed to serialize node config for {path}")]
  Serialize {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Invalid config key: {0:?}")]
  InvalidKey(String),
  #[error("Config key {0} is not set")]
  Missing(String),
  #[error("Config key {key} does not hold a {expected}")]
  InvalidType { key: String, expected: &'static str },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Get / set by key access to the node configuration.
pub trait ConfigStore: Send + Sync {
  /// Gets the value at `key`, or None if any part of the path is absent.
  fn get(&self, key: &str) -> ConfigResult<Option<Value>>;

  /// Writes all entries in one step. Either all entries are
  /// persisted or none are.
  fn set_many(&self, entries: Vec<(String, Value)>)
  -> ConfigResult<()>;

  /// The full `config` subtree.
  fn snapshot(&self) -> ConfigResult<Value>;

  fn set(&self, key: &str, value: Value) -> ConfigResult<()> {
    self.set_many(vec![(key.to_string(), value)])
  }

  fn get_string(&self, key: &str) -> ConfigResult<String> {
    self
      .get_string_opt(key)?
      .ok_or_else(|| ConfigError::Missing(key.to_string()))
  }

  fn get_string_opt(&self, key: &str) -> ConfigResult<Option<String>> {
    match self.get(key)? {
      None | Some(Value::Null) => Ok(None),
      Some(Value::String(value)) => Ok(Some(value)),
      Some(_) => Err(ConfigError::InvalidType {
        key: key.to_string(),
        expected: "string",
      }),
    }
  }
}

fn split_key(key: &str) -> ConfigResult<Vec<&str>> {
  let parts = key.split('.').collect::<Vec<_>>();
  if parts.iter().any(|part| part.is_empty()) {
    return Err(ConfigError::InvalidKey(key.to_string()));
  }
  Ok(parts)
}

fn lookup(root: &Value, key: &str) -> ConfigResult<Option<Value>> {
  let mut current = root;
  for part in split_key(key)? {
    match current.get(part) {
      Some(next) => current = next,
      None => return Ok(None),
    }
  }
  Ok(Some(current.clone()))
}

/// Creates intermediate objects as needed.
/// Non-object intermediate values are replaced.
fn insert(root: &mut Value, key: &str, value: Value) -> ConfigResult<()> {
  let parts = split_key(key)?;
  let (last, path) = parts
    .split_last()
    .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
  let mut current = root;
  for part in path {
    current = object_mut(current)
      .entry(part.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
  }
  object_mut(current).insert(last.to_string(), value);
  Ok(())
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
  if !value.is_object() {
    *value = Value::Object(Map::new());
  }
  value.as_object_mut().expect("value was just made an object")
}

fn config_subtree(root: &Value) -> Value {
  root
    .get(keys::ROOT)
    .cloned()
    .unwrap_or_else(|| Value::Object(Map::new()))
}
