/// In-memory engine. Stores live in a table keyed by location, so a store
/// reopened at the same location sees the same data until it is destroyed or
/// the table is cleared.
use crate::config::types::{LevelError, Result};
use crate::engine::{Engine, Store};
use log::debug;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

type Table = Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>;

static SHARED: OnceLock<Arc<MemoryEngine>> = OnceLock::new();

pub struct MemoryEngine {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn instance() -> &'static Arc<MemoryEngine> {
        SHARED.get_or_init(|| Arc::new(MemoryEngine::new()))
    }

    /// The process-wide instance that `mem: true` selects
    pub fn shared() -> Arc<dyn Engine> {
        Self::instance().clone()
    }

    /// Drop every store held by the shared instance
    pub fn clear_global_store() {
        let engine = Self::instance();
        if let Ok(mut tables) = engine.tables.lock() {
            debug!("Clearing {} in-memory stores", tables.len());
            tables.clear();
        }
    }

    /// Whether the shared instance holds a store at `location`
    pub fn has_global(location: &str) -> bool {
        Self::instance().contains(location)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.tables.lock().map(|t| t.contains_key(location)).unwrap_or(false)
    }

    fn table(&self, location: &str) -> Result<Table> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| LevelError::Config("memory engine lock poisoned".into()))?;
        Ok(tables.entry(location.to_string()).or_default().clone())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_memory(&self) -> bool {
        true
    }

    fn open(&self, location: &str, _options: &Map<String, Value>) -> Result<Box<dyn Store>> {
        debug!("Opening memory store {}", location);
        Ok(Box::new(MemoryStore {
            table: self.table(location)?,
        }))
    }

    fn destroy(&self, location: &str) -> Result<()> {
        if let Ok(mut tables) = self.tables.lock() {
            tables.remove(location);
        }
        Ok(())
    }
}

struct MemoryStore {
    table: Table,
}

impl MemoryStore {
    fn with<T>(&self, f: impl FnOnce(&mut BTreeMap<Vec<u8>, Vec<u8>>) -> T) -> Result<T> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| LevelError::Config("memory store lock poisoned".into()))?;
        Ok(f(&mut table))
    }
}

impl Store for MemoryStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with(|t| {
            t.insert(key.to_vec(), value.to_vec());
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with(|t| t.get(key).cloned())
    }

    fn del(&mut self, key: &[u8]) -> Result<()> {
        self.with(|t| {
            t.remove(key);
        })
    }

    fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.with(|t| {
            t.range(prefix.to_vec()..)
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
