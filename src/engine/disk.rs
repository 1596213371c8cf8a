/// Directory-backed engine
///
/// A store is a directory holding a `LOCK` file while open and a `data.json`
/// snapshot written on close. Entries are kept in memory between open and
/// close. Recognized options: `createIfMissing` (default true) and
/// `errorIfExists` (default false).
use crate::config::types::{LevelError, Result};
use crate::engine::{Engine, Store};
use crate::lifecycle::remove::remove_tree_secure;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "LOCK";
pub const DATA_FILE: &str = "data.json";

pub struct DiskEngine;

impl DiskEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn flag(options: &Map<String, Value>, key: &str, default: bool) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn io_error(context: String, e: std::io::Error) -> LevelError {
    LevelError::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
}

fn open_error(location: &str, reason: &str) -> LevelError {
    LevelError::Open {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

impl Engine for DiskEngine {
    fn name(&self) -> &str {
        "disk"
    }

    fn open(&self, location: &str, options: &Map<String, Value>) -> Result<Box<dyn Store>> {
        let dir = PathBuf::from(location);
        let data_path = dir.join(DATA_FILE);

        if !dir.is_dir() {
            if !flag(options, "createIfMissing", true) {
                return Err(open_error(location, "does not exist (createIfMissing is false)"));
            }
            fs::create_dir_all(&dir).map_err(|e| io_error(format!("Failed to create {}", location), e))?;
        }

        if data_path.exists() && flag(options, "errorIfExists", false) {
            return Err(open_error(location, "exists (errorIfExists is true)"));
        }

        let lock_path = dir.join(LOCK_FILE);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => open_error(location, "is already open"),
                _ => io_error(format!("Failed to lock {}", location), e),
            })?;

        let entries = match load(&data_path) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = fs::remove_file(&lock_path);
                return Err(e);
            }
        };

        debug!("Opened disk store {} ({} entries)", location, entries.len());
        Ok(Box::new(DiskStore {
            dir,
            entries,
            open: true,
        }))
    }

    fn destroy(&self, location: &str) -> Result<()> {
        remove_tree_secure(Path::new(location))
            .map_err(|e| io_error(format!("Failed to remove {}", location), e))
    }
}

fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(io_error(format!("Failed to read {}", path.display()), e)),
    };
    let encoded: BTreeMap<String, String> =
        serde_json::from_slice(&raw).map_err(|e| LevelError::Codec(format!("Corrupt {}: {}", path.display(), e)))?;

    let mut entries = BTreeMap::new();
    for (k, v) in encoded {
        let key = hex::decode(&k).map_err(|e| LevelError::Codec(e.to_string()))?;
        let value = hex::decode(&v).map_err(|e| LevelError::Codec(e.to_string()))?;
        entries.insert(key, value);
    }
    Ok(entries)
}

struct DiskStore {
    dir: PathBuf,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    open: bool,
}

impl DiskStore {
    fn flush(&self) -> Result<()> {
        let encoded: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let bytes = serde_json::to_vec(&encoded).map_err(|e| LevelError::Codec(e.to_string()))?;

        let tmp = self.dir.join(format!("{}.tmp", DATA_FILE));
        fs::write(&tmp, bytes).map_err(|e| io_error(format!("Failed to write {}", tmp.display()), e))?;
        fs::rename(&tmp, self.dir.join(DATA_FILE))
            .map_err(|e| io_error(format!("Failed to persist {}", self.dir.display()), e))
    }
}

impl Store for DiskStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn del(&mut self, key: &[u8]) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.flush()?;
        fs::remove_file(self.dir.join(LOCK_FILE))
            .map_err(|e| io_error(format!("Failed to unlock {}", self.dir.display()), e))
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                warn!("Failed to close disk store {}: {}", self.dir.display(), e);
            }
        }
    }
}
