/// Process-exit hooks
///
/// Forgotten stores are closed before the process terminates. Each managed
/// close registers one hook here and deregisters it the moment it reaches the
/// closed state, so a hook never runs after an explicit close.
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

/// A hook to run once at shutdown
pub type ExitHook = Box<dyn FnOnce() + Send>;

/// Registration handle for a pending hook
pub type HookId = u64;

/// Collaborator that managed closes register with
pub trait ShutdownHooks: Send + Sync {
    fn register(&self, hook: ExitHook) -> HookId;

    /// Returns false if the hook already ran or was never registered
    fn unregister(&self, id: HookId) -> bool;
}

/// Ownership table of pending closers, plus finalizers that run after them
pub struct HookRegistry {
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<HookId, ExitHook>>,
    finalizers: Mutex<Vec<ExitHook>>,
    roots: Mutex<HashMap<PathBuf, Arc<AtomicBool>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            finalizers: Mutex::new(Vec::new()),
            roots: Mutex::new(HashMap::new()),
        }
    }

    /// Number of hooks still waiting
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self, id: HookId) -> bool {
        self.pending.lock().map(|p| p.contains_key(&id)).unwrap_or(false)
    }

    /// Register work that must run after every pending hook, such as removing
    /// the directory that held the closed stores.
    pub fn add_finalizer(&self, hook: ExitHook) {
        if let Ok(mut finalizers) = self.finalizers.lock() {
            finalizers.push(hook);
        }
    }

    /// Removal mode of an exit-time root cleanup in this registry, shared
    /// with its finalizer. The flag is true when the whole tree goes. The
    /// second value is true for the call that created the entry.
    pub(crate) fn root_cleanup_flag(&self, root: &Path) -> Option<(Arc<AtomicBool>, bool)> {
        let mut roots = self.roots.lock().ok()?;
        match roots.get(root) {
            Some(flag) => Some((flag.clone(), false)),
            None => {
                let flag = Arc::new(AtomicBool::new(false));
                roots.insert(root.to_path_buf(), flag.clone());
                Some((flag, true))
            }
        }
    }

    /// Run and drop every pending hook in registration order, then the
    /// finalizers. Hooks run without the registry lock held, so they may
    /// unregister themselves. Returns how many hooks ran.
    pub fn run_pending(&self) -> usize {
        let hooks: Vec<ExitHook> = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).into_values().collect(),
            Err(_) => Vec::new(),
        };
        let count = hooks.len();
        if count > 0 {
            info!("Running {} pending exit hooks", count);
        }
        for hook in hooks {
            run_guarded(hook);
        }

        let finalizers: Vec<ExitHook> = match self.finalizers.lock() {
            Ok(mut f) => std::mem::take(&mut *f),
            Err(_) => Vec::new(),
        };
        for hook in finalizers {
            run_guarded(hook);
        }
        count
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHooks for HookRegistry {
    fn register(&self, hook: ExitHook) -> HookId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, hook);
        }
        debug!("Registered exit hook {}", id);
        id
    }

    fn unregister(&self, id: HookId) -> bool {
        let removed = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(_) => None,
        };
        // Dropped outside the lock; the hook may own the last store handle
        let found = removed.is_some();
        drop(removed);
        if found {
            debug!("Unregistered exit hook {}", id);
        }
        found
    }
}

fn run_guarded(hook: ExitHook) {
    if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!("Exit hook panicked");
    }
}

static PROCESS_HOOKS: OnceLock<Arc<HookRegistry>> = OnceLock::new();
static INSTALL_ATEXIT: Once = Once::new();

extern "C" fn run_process_hooks() {
    if let Some(registry) = PROCESS_HOOKS.get() {
        registry.run_pending();
    }
}

/// The process-wide registry. Its hooks run from an `atexit` handler, which
/// is installed on first use.
pub fn process_hooks() -> Arc<HookRegistry> {
    let registry = PROCESS_HOOKS.get_or_init(|| Arc::new(HookRegistry::new())).clone();
    INSTALL_ATEXIT.call_once(|| {
        let rc = unsafe { libc::atexit(run_process_hooks) };
        if rc != 0 {
            warn!("Failed to install atexit handler; forgotten stores will not be closed at exit");
        }
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_register_and_run() {
        let registry = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            registry.register(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.run_pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
        assert_eq!(registry.run_pending(), 0);
    }

    #[test]
    fn test_unregistered_hook_never_runs() {
        let registry = HookRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = registry.register(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finalizers_run_after_hooks() {
        let registry = Arc::new(HookRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        registry.add_finalizer(Box::new(move || o.lock().unwrap().push("finalizer")));
        let o = order.clone();
        registry.register(Box::new(move || o.lock().unwrap().push("hook")));

        registry.run_pending();
        assert_eq!(*order.lock().unwrap(), vec!["hook", "finalizer"]);
    }

    #[test]
    fn test_hook_may_unregister_itself() {
        let registry = Arc::new(HookRegistry::new());
        let id_slot = Arc::new(Mutex::new(0));
        let (r, slot) = (registry.clone(), id_slot.clone());
        let id = registry.register(Box::new(move || {
            let id = *slot.lock().unwrap();
            assert!(!r.unregister(id));
        }));
        *id_slot.lock().unwrap() = id;

        assert_eq!(registry.run_pending(), 1);
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let registry = HookRegistry::new();
        registry.register(Box::new(|| panic!("boom")));
        assert_eq!(registry.run_pending(), 1);
    }

    #[test]
    fn test_process_hooks_is_shared() {
        let a = process_hooks();
        let b = process_hooks();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
