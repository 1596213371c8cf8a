//! Live store handles
//!
//! [`Db`] is the engine-backed base store. A [`Handle`] is what callers get
//! back from a factory: the outermost surface of the wrapper chain plus the
//! `close`/`location` contract every surface is guaranteed to carry.

pub mod db;

pub use db::Db;

use crate::config::types::{LevelError, Result};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shareable close operation
pub type Closer = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Lifecycle state of a store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenState {
    Pending,
    Open,
    Closing,
    Closed,
}

/// Minimal capability interface a decorator's result conforms to. Missing
/// `location` or `closer` are backfilled by the composer; everything else
/// is reached by downcasting through [`Handle::surface`].
pub trait Surface: Any + Send + Sync {
    fn location(&self) -> Option<String> {
        None
    }

    fn closer(&self) -> Option<Closer> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// The final handle of a wrapper chain
#[derive(Clone)]
pub struct Handle {
    surface: Arc<dyn Surface>,
    location: String,
    closer: Closer,
    db: Db,
}

impl Handle {
    /// A handle with no decorators applied
    pub fn from_db(db: Db) -> Self {
        Self {
            surface: Arc::new(db.clone()),
            location: db.location().to_string(),
            closer: db.close_fn(),
            db,
        }
    }

    pub(crate) fn layered(surface: Arc<dyn Surface>, location: String, closer: Closer, db: Db) -> Self {
        Self {
            surface,
            location,
            closer,
            db,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Close through the outermost surface's close
    pub fn close(&self) -> Result<()> {
        (self.closer)()
    }

    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }

    /// The base store under the chain
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Downcast the outermost surface, looking through surfaces that are
    /// themselves handles.
    pub fn surface<T: Surface>(&self) -> Option<&T> {
        let any = self.surface.as_any();
        if let Some(found) = any.downcast_ref::<T>() {
            return Some(found);
        }
        any.downcast_ref::<Handle>().and_then(|inner| inner.surface::<T>())
    }

    pub fn state(&self) -> OpenState {
        self.db.state()
    }

    pub fn is_open(&self) -> bool {
        self.db.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }

    pub fn on_open<F>(&self, listener: F)
    where
        F: FnOnce(Option<&LevelError>) + Send + 'static,
    {
        self.db.on_open(listener)
    }

    pub fn on_closed<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.db.on_closed(listener)
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.db.put(key, value)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.db.get(key)
    }

    pub fn del(&self, key: &str) -> Result<()> {
        self.db.del(key)
    }
}

impl Surface for Handle {
    fn location(&self) -> Option<String> {
        Some(self.location.clone())
    }

    fn closer(&self) -> Option<Closer> {
        Some(self.closer.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("location", &self.location)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize::Encodings;
    use crate::engine::{Engine, MemoryEngine};
    use crate::lifecycle::{HookRegistry, ManagedClose};
    use serde_json::Map;

    fn base() -> Db {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        let managed = ManagedClose::new("handle-base", false, Arc::new(HookRegistry::new()), None);
        Db::new("handle-base", engine, Map::new(), Encodings::default(), managed)
    }

    #[test]
    fn test_handle_from_db() {
        let db = base();
        db.open().unwrap();
        let handle = Handle::from_db(db);
        assert_eq!(handle.location(), "handle-base");
        assert!(handle.surface::<Db>().is_some());
        handle.close().unwrap();
        assert_eq!(handle.state(), OpenState::Closed);
    }

    #[test]
    fn test_surface_looks_through_nested_handles() {
        let db = base();
        let inner = Handle::from_db(db.clone());
        let outer = Handle::layered(Arc::new(inner), "outer".into(), db.close_fn(), db);
        assert!(outer.surface::<Db>().is_some());
        assert_eq!(outer.location(), "outer");
    }
}
