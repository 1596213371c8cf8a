/// Base store handle
///
/// Tracks open state, owns the engine store, fires open/closed events and
/// routes every close through the managed close.
use crate::config::normalize::Encodings;
use crate::config::types::{LevelError, Result};
use crate::engine::{Engine, Store};
use crate::handle::{Closer, OpenState, Surface};
use crate::lifecycle::ManagedClose;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

type OpenListener = Box<dyn FnOnce(Option<&LevelError>) + Send>;
type ClosedListener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Listeners {
    open: Vec<OpenListener>,
    closed: Vec<ClosedListener>,
}

struct DbInner {
    location: String,
    engine: Arc<dyn Engine>,
    options: Map<String, Value>,
    encodings: Encodings,
    state: Mutex<OpenState>,
    store: Mutex<Option<Box<dyn Store>>>,
    listeners: Mutex<Listeners>,
    managed: ManagedClose,
}

/// The engine-backed store at the bottom of every wrapper chain
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    pub fn new(
        location: &str,
        engine: Arc<dyn Engine>,
        options: Map<String, Value>,
        encodings: Encodings,
        managed: ManagedClose,
    ) -> Self {
        Self {
            inner: Arc::new(DbInner {
                location: location.to_string(),
                engine,
                options,
                encodings,
                state: Mutex::new(OpenState::Pending),
                store: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
                managed,
            }),
        }
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub fn encodings(&self) -> Encodings {
        self.inner.encodings
    }

    /// Passthrough options the engine was opened with
    pub fn options(&self) -> &Map<String, Value> {
        &self.inner.options
    }

    pub fn state(&self) -> OpenState {
        self.inner.state.lock().map(|s| *s).unwrap_or(OpenState::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.state() == OpenState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == OpenState::Closed
    }

    fn set_state(&self, next: OpenState) {
        if let Ok(mut state) = self.inner.state.lock() {
            *state = next;
        }
    }

    /// Arm the process-exit hook that closes this store if nobody else does
    pub(crate) fn arm_exit_hook(&self) {
        let db = self.clone();
        self.inner.managed.arm(Box::new(move || {
            warn!("Closing forgotten store at exit: {}", db.location());
            if let Err(e) = db.close() {
                warn!("Exit close of {} failed: {}", db.location(), e);
            }
        }));
    }

    /// Open the engine store. Only a pending store can be opened; open
    /// listeners receive the outcome.
    pub fn open(&self) -> Result<()> {
        if self.state() != OpenState::Pending {
            return Err(LevelError::Open {
                location: self.location().to_string(),
                reason: format!("cannot be opened from state {:?}", self.state()),
            });
        }

        let outcome = self
            .inner
            .engine
            .open(&self.inner.location, &self.inner.options)
            .and_then(|store| {
                let mut slot = self
                    .inner
                    .store
                    .lock()
                    .map_err(|_| LevelError::Config("store lock poisoned".into()))?;
                *slot = Some(store);
                Ok(())
            });

        match &outcome {
            Ok(()) => {
                // a close that raced ahead of the open wins
                if self.state() == OpenState::Pending {
                    self.inner.managed.mark_opened();
                    self.set_state(OpenState::Open);
                }
                debug!("Opened {}", self.location());
            }
            Err(e) => warn!("Failed to open {}: {}", self.location(), e),
        }

        let listeners = self
            .inner
            .listeners
            .lock()
            .map(|mut l| std::mem::take(&mut l.open))
            .unwrap_or_default();
        for listener in listeners {
            listener(outcome.as_ref().err());
        }
        outcome
    }

    /// Register a one-shot open listener. Fires with the outcome of the next
    /// open attempt; if the store is already open it fires immediately.
    pub fn on_open<F>(&self, listener: F)
    where
        F: FnOnce(Option<&LevelError>) + Send + 'static,
    {
        if self.is_open() {
            listener(None);
            return;
        }
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.open.push(Box::new(listener));
        }
    }

    /// Register a one-shot closed listener. Listeners run after the close
    /// attempt and any deletion finished, in registration order. If the
    /// store is already closed the listener runs immediately.
    pub fn on_closed<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            listener();
            return;
        }
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.closed.push(Box::new(listener));
        }
    }

    /// Managed close: idempotent, deregisters the exit hook, deletes the
    /// location when cleaning is on.
    pub fn close(&self) -> Result<()> {
        let transition = self.inner.managed.close_with(|| {
            self.set_state(OpenState::Closing);
            let store = self.inner.store.lock().ok().and_then(|mut s| s.take());
            match store {
                Some(mut store) => store.close(),
                None => Ok(()),
            }
        });

        if !transition.is_fresh() {
            return transition.into_result();
        }

        self.set_state(OpenState::Closed);
        let listeners = self
            .inner
            .listeners
            .lock()
            .map(|mut l| {
                l.open.clear();
                std::mem::take(&mut l.closed)
            })
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
        transition.into_result()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut dyn Store) -> Result<T>) -> Result<T> {
        let mut slot = self
            .inner
            .store
            .lock()
            .map_err(|_| LevelError::Config("store lock poisoned".into()))?;
        match slot.as_mut() {
            Some(store) if self.is_open() => f(store.as_mut()),
            _ => Err(LevelError::NotOpen(self.inner.location.clone())),
        }
    }

    pub fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_store(|s| s.put(key, value))
    }

    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_store(|s| s.get(key))
    }

    pub fn del_raw(&self, key: &[u8]) -> Result<()> {
        self.with_store(|s| s.del(key))
    }

    pub fn keys_raw(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.with_store(|s| s.keys(prefix))
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        let k = self.inner.encodings.key.encode(&Value::String(key.to_string()))?;
        let v = self.inner.encodings.value.encode(value)?;
        self.put_raw(&k, &v)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let k = self.inner.encodings.key.encode(&Value::String(key.to_string()))?;
        match self.get_raw(&k)? {
            Some(bytes) => Ok(Some(self.inner.encodings.value.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn del(&self, key: &str) -> Result<()> {
        let k = self.inner.encodings.key.encode(&Value::String(key.to_string()))?;
        self.del_raw(&k)
    }

    /// The managed close as a shareable function
    pub fn close_fn(&self) -> Closer {
        let db = self.clone();
        Arc::new(move || db.close())
    }
}

impl Surface for Db {
    fn location(&self) -> Option<String> {
        Some(self.inner.location.clone())
    }

    fn closer(&self) -> Option<Closer> {
        Some(self.close_fn())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("location", &self.inner.location)
            .field("engine", &self.inner.engine.name())
            .field("state", &self.state())
            .finish()
    }
}
