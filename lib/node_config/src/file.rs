use std::{
  fs::{File, OpenOptions},
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde_json::{Map, Value};

use crate::{
  ConfigError, ConfigResult, ConfigStore, config_subtree, insert,
  lookup,
};

/// Config store backed by a JSON document on disk.
///
/// The document is re-read on every access so changes made by
/// other processes are picked up. Writes go through a temporary
/// file and a rename, so readers never observe a partial document.
/// Read-modify-write cycles hold an exclusive advisory lock on a
/// sibling `.lock` file, so concurrent writers in other processes
/// do not lose each other's updates.
#[derive(Debug)]
pub struct FileConfigStore {
  path: PathBuf,
  /// Serializes read-modify-write cycles within this process.
  lock: Mutex<()>,
}

impl FileConfigStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_error(&self, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
      path: self.path.display().to_string(),
      source,
    }
  }

  fn lock_path(&self) -> PathBuf {
    let mut name = self.path.clone().into_os_string();
    name.push(".lock");
    PathBuf::from(name)
  }

  /// Held until the returned file is dropped.
  fn lock_exclusive(&self) -> ConfigResult<File> {
    self.create_parent()?;
    let lock_path = self.lock_path();
    let file = OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(&lock_path)
      .map_err(|e| self.io_error(e))?;
    file.lock().map_err(|e| self.io_error(e))?;
    Ok(file)
  }

  fn create_parent(&self) -> ConfigResult<()> {
    if let Some(parent) = self
      .path
      .parent()
      .filter(|parent| !parent.as_os_str().is_empty())
    {
      std::fs::create_dir_all(parent)
        .map_err(|e| self.io_error(e))?;
    }
    Ok(())
  }

  fn read(&self) -> ConfigResult<Value> {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Ok(Value::Object(Map::new()));
      }
      Err(e) => return Err(self.io_error(e)),
    };
    if contents.trim().is_empty() {
      return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&contents).map_err(|source| {
      ConfigError::Parse {
        path: self.path.display().to_string(),
        source,
      }
    })
  }

  fn write(&self, root: &Value) -> ConfigResult<()> {
    self.create_parent()?;
    let contents =
      serde_json::to_vec_pretty(root).map_err(|source| {
        ConfigError::Serialize {
          path: self.path.display().to_string(),
          source,
        }
      })?;
    let tmp = self.path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(|e| self.io_error(e))?;
    std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
  }
}

impl ConfigStore for FileConfigStore {
  fn get(&self, key: &str) -> ConfigResult<Option<Value>> {
    lookup(&self.read()?, key)
  }

  fn set_many(
    &self,
    entries: Vec<(String, Value)>,
  ) -> ConfigResult<()> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let _file_lock = self.lock_exclusive()?;
    let mut root = self.read()?;
    for (key, value) in entries {
      insert(&mut root, &key, value)?;
    }
    self.write(&root)?;
    tracing::debug!("Updated node config at {:?}", self.path);
    Ok(())
  }

  fn snapshot(&self) -> ConfigResult<Value> {
    Ok(config_subtree(&self.read()?))
  }
}
