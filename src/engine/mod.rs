//! Storage engines
//!
//! The key-value engine is an external collaborator: tmplevel only needs to
//! open, close and destroy a store at a location. Two engines ship with the
//! crate, an in-memory one and a directory-backed disk one.

pub mod disk;
pub mod memory;

pub use disk::DiskEngine;
pub use memory::MemoryEngine;

use crate::config::types::{LevelError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// An opened key-value store
pub trait Store: Send {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn del(&mut self, key: &[u8]) -> Result<()>;
    /// Keys starting with `prefix`, in ascending order
    fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>>;
    fn close(&mut self) -> Result<()>;
}

/// A storage backend
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Pure in-memory engines leave no filesystem footprint
    fn is_memory(&self) -> bool {
        false
    }

    fn open(&self, location: &str, options: &Map<String, Value>) -> Result<Box<dyn Store>>;

    /// Remove everything stored at `location`
    fn destroy(&self, location: &str) -> Result<()>;
}

/// Backend selection: an engine value or a name resolved by [`resolve_backend`]
#[derive(Clone)]
pub enum BackendRef {
    Named(String),
    Engine(Arc<dyn Engine>),
}

impl BackendRef {
    pub fn label(&self) -> String {
        match self {
            BackendRef::Named(name) => name.clone(),
            BackendRef::Engine(engine) => engine.name().to_string(),
        }
    }

    pub fn resolve(&self) -> Result<Arc<dyn Engine>> {
        match self {
            BackendRef::Named(name) => resolve_backend(name),
            BackendRef::Engine(engine) => Ok(engine.clone()),
        }
    }
}

impl From<&str> for BackendRef {
    fn from(name: &str) -> Self {
        BackendRef::Named(name.to_string())
    }
}

impl From<String> for BackendRef {
    fn from(name: String) -> Self {
        BackendRef::Named(name)
    }
}

impl From<Arc<dyn Engine>> for BackendRef {
    fn from(engine: Arc<dyn Engine>) -> Self {
        BackendRef::Engine(engine)
    }
}

/// True if `engine` is the shared in-memory engine instance
pub fn is_memory_engine(engine: &Arc<dyn Engine>) -> bool {
    let shared = MemoryEngine::shared();
    std::ptr::eq(
        Arc::as_ptr(engine) as *const u8,
        Arc::as_ptr(&shared) as *const u8,
    )
}

/// The default on-disk engine
pub fn default_disk_engine() -> Arc<dyn Engine> {
    static DISK: OnceLock<Arc<dyn Engine>> = OnceLock::new();
    DISK.get_or_init(|| Arc::new(DiskEngine::new())).clone()
}

static BACKENDS: OnceLock<Mutex<HashMap<String, Arc<dyn Engine>>>> = OnceLock::new();

fn backends() -> &'static Mutex<HashMap<String, Arc<dyn Engine>>> {
    BACKENDS.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn Engine>> = HashMap::new();
        map.insert("memory".into(), MemoryEngine::shared());
        map.insert("memdown".into(), MemoryEngine::shared());
        map.insert("disk".into(), default_disk_engine());
        map.insert("leveldown".into(), default_disk_engine());
        Mutex::new(map)
    })
}

/// Make an engine resolvable by name
pub fn register_backend(name: &str, engine: Arc<dyn Engine>) {
    if let Ok(mut map) = backends().lock() {
        map.insert(name.to_string(), engine);
    }
}

/// Look up a backend by name. Missing names fail with a remediation hint.
pub fn resolve_backend(name: &str) -> Result<Arc<dyn Engine>> {
    let found = backends().lock().ok().and_then(|map| map.get(name).cloned());
    found.ok_or_else(|| {
        LevelError::unavailable(
            "backend",
            name,
            vec![
                format!("Please try `tmplevel::engine::register_backend(\"{}\", engine)`", name),
                "Built-in backends are `memory` (alias `memdown`) and `disk` (alias `leveldown`)".to_string(),
            ],
        )
    })
}
