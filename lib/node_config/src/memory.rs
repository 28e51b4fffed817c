use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::{ConfigResult, ConfigStore, config_subtree, insert, lookup};

/// Config store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryConfigStore(Mutex<Value>);

impl Default for MemoryConfigStore {
  fn default() -> Self {
    Self(Mutex::new(Value::Object(Map::new())))
  }
}

impl MemoryConfigStore {
  pub fn new(root: Value) -> Self {
    Self(Mutex::new(root))
  }

  fn root(&self) -> std::sync::MutexGuard<'_, Value> {
    // A poisoned lock still holds a fully written document,
    // inserts never leave it half updated.
    self.0.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl ConfigStore for MemoryConfigStore {
  fn get(&self, key: &str) -> ConfigResult<Option<Value>> {
    lookup(&self.root(), key)
  }

  fn set_many(
    &self,
    entries: Vec<(String, Value)>,
  ) -> ConfigResult<()> {
    let mut root = self.root();
    let mut updated = root.clone();
    for (key, value) in entries {
      insert(&mut updated, &key, value)?;
    }
    *root = updated;
    Ok(())
  }

  fn snapshot(&self) -> ConfigResult<Value> {
    Ok(config_subtree(&self.root()))
  }
}
