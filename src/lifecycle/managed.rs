/// Managed close: idempotent, exit-hook backed, delete-after-close
use crate::config::types::{LevelError, Result};
use crate::lifecycle::hooks::{ExitHook, HookId, ShutdownHooks};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Deletion strategy for a location, run only after a successful close of
/// a store that reached open
pub type Deleter = Box<dyn FnOnce() -> Result<()> + Send>;

/// Failure recorded by the first close attempt and replayed to later callers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleFailure {
    Close(String),
    Delete(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed(std::result::Result<(), LifecycleFailure>),
}

/// What a call to [`ManagedClose::close_with`] did
#[derive(Debug)]
pub enum Transition {
    /// This call performed the close
    Completed(Result<()>),
    /// A previous call already finished; its outcome is replayed
    AlreadyClosed(Result<()>),
    /// Another caller is closing right now (re-entrant call)
    InProgress,
}

impl Transition {
    /// True only for the call that moved the resource to closed
    pub fn is_fresh(&self) -> bool {
        matches!(self, Transition::Completed(_))
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Transition::Completed(r) | Transition::AlreadyClosed(r) => r,
            Transition::InProgress => Ok(()),
        }
    }
}

/// Owns the decision of whether a location is deleted after close, and the
/// process-exit hook that closes the resource if nobody else does.
pub struct ManagedClose {
    location: String,
    clean: bool,
    phase: Mutex<Phase>,
    hooks: Arc<dyn ShutdownHooks>,
    hook: Mutex<Option<HookId>>,
    opened: AtomicBool,
    deleter: Mutex<Option<Deleter>>,
    discard: Mutex<Option<Deleter>>,
}

impl ManagedClose {
    pub fn new(location: &str, clean: bool, hooks: Arc<dyn ShutdownHooks>, deleter: Option<Deleter>) -> Self {
        Self {
            location: location.to_string(),
            clean,
            phase: Mutex::new(Phase::Open),
            hooks,
            hook: Mutex::new(None),
            opened: AtomicBool::new(false),
            deleter: Mutex::new(deleter),
            discard: Mutex::new(None),
        }
    }

    /// Cleanup for a resource that never opened. It must only remove what
    /// the claim itself created, never data someone else put there.
    pub fn with_discard(self, discard: Deleter) -> Self {
        if let Ok(mut slot) = self.discard.lock() {
            *slot = Some(discard);
        }
        self
    }

    /// Record that the resource reached open; only then does a clean close
    /// run the deleter.
    pub fn mark_opened(&self) {
        self.opened.store(true, Ordering::SeqCst);
    }

    pub fn was_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn clean(&self) -> bool {
        self.clean
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.current(), Phase::Closed(_))
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.current(), Phase::Closing)
    }

    /// Whether an exit hook is currently registered for this resource
    pub fn hook_armed(&self) -> bool {
        self.hook.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    fn current(&self) -> Phase {
        self.phase.lock().map(|p| p.clone()).unwrap_or(Phase::Open)
    }

    /// Register the exit hook. At most one hook per managed close; arming an
    /// already closed resource is a no-op.
    pub fn arm(&self, on_exit: ExitHook) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut hook) = self.hook.lock() {
            if hook.is_none() {
                *hook = Some(self.hooks.register(on_exit));
            }
        }
    }

    /// Run `base` at most once. The exit hook is deregistered as soon as the
    /// attempt finishes, successful or not. Deletion follows only a
    /// successful close, and only if the resource was opened; otherwise the
    /// discard strategy runs instead.
    pub fn close_with<F>(&self, base: F) -> Transition
    where
        F: FnOnce() -> Result<()>,
    {
        {
            let mut phase = match self.phase.lock() {
                Ok(phase) => phase,
                Err(_) => return Transition::InProgress,
            };
            match &*phase {
                Phase::Closed(outcome) => return Transition::AlreadyClosed(self.replay(outcome)),
                Phase::Closing => return Transition::InProgress,
                Phase::Open => {}
            }
            *phase = Phase::Closing;
        }

        debug!("Closing {}", self.location);
        let mut outcome = base().map_err(|e| LifecycleFailure::Close(e.to_string()));

        self.disarm();

        if outcome.is_ok() && self.clean {
            outcome = if self.was_opened() {
                self.delete()
            } else {
                self.discard()
            };
        }

        match &outcome {
            Ok(()) => info!("Closed {}", self.location),
            Err(failure) => warn!("Close of {} failed: {:?}", self.location, failure),
        }

        if let Ok(mut phase) = self.phase.lock() {
            *phase = Phase::Closed(outcome.clone());
        }
        Transition::Completed(self.replay(&outcome))
    }

    fn disarm(&self) {
        let id = self.hook.lock().ok().and_then(|mut h| h.take());
        if let Some(id) = id {
            self.hooks.unregister(id);
        }
    }

    fn delete(&self) -> std::result::Result<(), LifecycleFailure> {
        debug!("Deleting {}", self.location);
        run_once(&self.deleter)
    }

    fn discard(&self) -> std::result::Result<(), LifecycleFailure> {
        debug!("Discarding never-opened {}", self.location);
        run_once(&self.discard)
    }

    fn replay(&self, outcome: &std::result::Result<(), LifecycleFailure>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(LifecycleFailure::Close(reason)) => Err(LevelError::Close {
                location: self.location.clone(),
                reason: reason.clone(),
            }),
            Err(LifecycleFailure::Delete(reason)) => Err(LevelError::Delete {
                location: self.location.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

fn run_once(slot: &Mutex<Option<Deleter>>) -> std::result::Result<(), LifecycleFailure> {
    match slot.lock().ok().and_then(|mut d| d.take()) {
        Some(delete) => delete().map_err(|e| LifecycleFailure::Delete(e.to_string())),
        None => Ok(()),
    }
}
