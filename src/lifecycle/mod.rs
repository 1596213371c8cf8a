//! Lifecycle management
//!
//! Idempotent close, process-exit hooks and delete-after-close for store
//! locations.

pub mod hooks;
pub mod managed;
pub mod remove;

pub use hooks::{process_hooks, ExitHook, HookId, HookRegistry, ShutdownHooks};
pub use managed::{Deleter, LifecycleFailure, ManagedClose, Transition};

use log::{debug, warn};
use std::path::Path;
use std::sync::atomic::Ordering;

/// Remove a generator root at process exit. With `always` the whole tree
/// goes; otherwise only an empty root is removed. Scheduled once per root
/// and registry; a later `always` request upgrades an earlier empty-only one.
pub fn schedule_root_cleanup(hooks: &HookRegistry, root: &Path, always: bool) {
    let (remove_all, fresh) = match hooks.root_cleanup_flag(root) {
        Some(entry) => entry,
        None => return,
    };
    if always {
        remove_all.store(true, Ordering::SeqCst);
    }
    if !fresh {
        return;
    }

    let root = root.to_path_buf();
    debug!("Scheduling exit cleanup of {} (always: {})", root.display(), always);
    hooks.add_finalizer(Box::new(move || {
        let outcome = if remove_all.load(Ordering::SeqCst) {
            remove::remove_tree_secure(&root).map(|_| true)
        } else {
            remove::remove_if_empty(&root)
        };
        if let Err(e) = outcome {
            warn!("Failed to remove {} at exit: {}", root.display(), e);
        }
    }));
}
