/// Store factory
///
/// A factory is built once from a name template and options, then creates
/// any number of stores. Each store gets a fresh location, a managed close
/// armed with a process-exit hook, and the configured wrapper chain.
use crate::args::{Arg, Call};
use crate::config::normalize::{backfill_encodings, normalize, Encodings, Normalized};
use crate::config::types::{LevelError, LevelOptions, Result, StoreSettings};
use crate::config::FactoryConfig;
use crate::engine::{is_memory_engine, MemoryEngine};
use crate::handle::{Db, Handle};
use crate::harness::scheduler::Scheduler;
use crate::lifecycle::remove::remove_if_empty;
use crate::lifecycle::{process_hooks, schedule_root_cleanup, Deleter, HookRegistry, ManagedClose};
use crate::location::{LocationSpec, Mode, WILDCARD};
use crate::wrap::{compose, resolve_chain, ResolvedWrapper};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Receives the open outcome of a created store
pub type OpenCallback = Box<dyn FnOnce(std::result::Result<&Handle, &LevelError>) + Send>;

/// Positional argument accepted by [`Factory::create`]
pub type CreateArg = Arg<StoreSettings, OpenCallback>;

pub struct Factory {
    template: Option<String>,
    normalized: Normalized,
    location: LocationSpec,
    hooks: Arc<HookRegistry>,
}

struct Prepared {
    db: Db,
    chain: Vec<ResolvedWrapper>,
}

impl Factory {
    /// Build a factory using the process-wide exit hook registry
    pub fn new(template: Option<&str>, options: LevelOptions) -> Result<Self> {
        Self::with_hooks(template, options, process_hooks())
    }

    /// Build a factory that registers exit hooks with `hooks`
    pub fn with_hooks(template: Option<&str>, options: LevelOptions, hooks: Arc<HookRegistry>) -> Result<Self> {
        let normalized = normalize(&options)?;

        if normalized.is_memory() && normalized.clean && is_memory_engine(&normalized.engine) {
            MemoryEngine::clear_global_store();
        }

        let location = LocationSpec::new(template, normalized.mode, normalized.generator);
        debug!(
            "Factory for {:?} ({:?}, clean: {}, always: {})",
            template, normalized.mode, normalized.clean, normalized.always
        );

        Ok(Self {
            template: template.map(str::to_string),
            normalized,
            location,
            hooks,
        })
    }

    pub fn from_config(config: &FactoryConfig) -> Result<Self> {
        Self::new(config.name.as_deref(), config.to_options())
    }

    /// Resolve disk locations under `dir` instead of the system temp dir
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.location = self.location.in_dir(dir);
        self
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn normalized(&self) -> &Normalized {
        &self.normalized
    }

    pub fn mode(&self) -> Mode {
        self.normalized.mode
    }

    pub fn is_memory(&self) -> bool {
        self.normalized.is_memory()
    }

    pub fn clean(&self) -> bool {
        self.normalized.clean
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Directory holding this factory's generated locations, if any
    pub fn root(&self) -> Option<PathBuf> {
        self.location.root()
    }

    /// Create and open a store. Arguments: an optional sub-name, per-store
    /// settings overriding the factory's, and an open callback.
    pub fn create<I>(&self, args: I) -> Result<Handle>
    where
        I: IntoIterator<Item = CreateArg>,
    {
        let call = Call::classify(args);
        let Prepared { db, chain } = self.prepare(call.name.as_deref(), call.options.as_ref())?;

        if let Err(e) = db.open() {
            close_quietly(&db);
            if let Some(callback) = call.func {
                callback(Err(&e));
            }
            return Err(e);
        }

        let handle = match compose(db.clone(), &chain) {
            Ok(handle) => handle,
            Err(e) => {
                close_quietly(&db);
                return Err(e);
            }
        };

        info!("Created store at {}", handle.location());
        if let Some(callback) = call.func {
            callback(Ok(&handle));
        }
        Ok(handle)
    }

    /// Create a store whose engine opens on the next scheduler tick. The
    /// returned handle is pending until then.
    pub fn create_deferred<I>(&self, scheduler: &Scheduler, args: I) -> Result<Handle>
    where
        I: IntoIterator<Item = CreateArg>,
    {
        let call = Call::classify(args);
        let Prepared { db, chain } = self.prepare(call.name.as_deref(), call.options.as_ref())?;

        let handle = match compose(db.clone(), &chain) {
            Ok(handle) => handle,
            Err(e) => {
                close_quietly(&db);
                return Err(e);
            }
        };

        let opened = handle.clone();
        let callback = call.func;
        scheduler.defer(move || {
            let outcome = opened.db().open();
            if outcome.is_err() {
                close_quietly(opened.db());
            }
            if let Some(callback) = callback {
                callback(outcome.as_ref().map(|_| &opened));
            }
        });

        debug!("Deferred open of {}", handle.location());
        Ok(handle)
    }

    /// Create with no arguments
    pub fn open(&self) -> Result<Handle> {
        self.create(Vec::new())
    }

    /// Create under a sub-name
    pub fn open_named(&self, name: &str) -> Result<Handle> {
        self.create(vec![CreateArg::name(name)])
    }

    /// Everything up to (not including) the engine open. Configuration and
    /// resolution errors surface before the location is created.
    fn prepare(&self, sub: Option<&str>, overrides: Option<&StoreSettings>) -> Result<Prepared> {
        let settings = backfill_encodings(&self.normalized.store.merged(overrides));
        let encodings = Encodings::from_settings(&settings)?;
        let chain = resolve_chain(&self.normalized.chain)?;

        if self.mode() == Mode::Disk && (self.normalized.clean || self.normalized.always) {
            if let Some(root) = self.location.root() {
                schedule_root_cleanup(&self.hooks, &root, self.normalized.always);
            }
        }

        let location = self.location.resolve(sub)?;
        let nested = sub.map_or(false, |s| !s.is_empty());
        let deleter = self.deleter(&location, nested);
        let mut managed = ManagedClose::new(&location, self.normalized.clean, self.hooks.clone(), Some(deleter));
        if self.mode() == Mode::Disk {
            managed = managed.with_discard(self.discard(&location, nested));
        }
        let db = Db::new(
            &location,
            self.normalized.engine.clone(),
            settings.engine.clone(),
            encodings,
            managed,
        );
        db.arm_exit_hook();
        Ok(Prepared { db, chain })
    }

    /// Destroy the store, then the generated directory a sub-name was
    /// nested in once it is empty.
    fn deleter(&self, location: &str, nested: bool) -> Deleter {
        let engine = self.normalized.engine.clone();
        let location = location.to_string();
        let claimed = self.claimed_parent(&location, nested);

        Box::new(move || {
            engine.destroy(&location)?;
            if let Some(dir) = claimed {
                remove_if_empty(&dir)?;
            }
            debug!("Deleted {}", location);
            Ok(())
        })
    }

    /// For a store that never opened: drop the directories the claim made
    /// if they are still empty. Existing data is never touched.
    fn discard(&self, location: &str, nested: bool) -> Deleter {
        let dir = PathBuf::from(location);
        let claimed = self.claimed_parent(location, nested);

        Box::new(move || {
            if remove_if_empty(&dir)? {
                debug!("Removed unused location {}", dir.display());
            }
            if let Some(parent) = claimed {
                remove_if_empty(&parent)?;
            }
            Ok(())
        })
    }

    fn claimed_parent(&self, location: &str, nested: bool) -> Option<PathBuf> {
        let generated = self.template.as_deref().map_or(true, |t| t.contains(WILDCARD));
        match self.mode() {
            Mode::Disk if nested && generated => Path::new(location).parent().map(Path::to_path_buf),
            _ => None,
        }
    }
}

fn close_quietly(db: &Db) {
    if let Err(e) = db.close() {
        warn!("Failed to close {} after a failed create: {}", db.location(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::handle::OpenState;
    use crate::wrap::{Decorator, Sublevels, WrapItem};
    use serde_json::json;
    use std::sync::Mutex;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tmplevel_factory_{}_{}", name, std::process::id()))
    }

    fn hooks() -> Arc<HookRegistry> {
        Arc::new(HookRegistry::new())
    }

    #[test]
    fn test_memory_store_has_no_footprint() {
        let factory = Factory::with_hooks(None, LevelOptions::new().mem(true), hooks()).unwrap();
        let handle = factory.open().unwrap();
        assert!(!Path::new(handle.location()).exists());
        handle.put("a", &json!("b")).unwrap();
        handle.close().unwrap();
        assert!(!Path::new(handle.location()).exists());
    }

    #[test]
    fn test_memory_names_join_template_and_sub() {
        let factory = Factory::with_hooks(Some("fixtures-*"), LevelOptions::new().mem(true), hooks()).unwrap();
        let handle = factory.open_named("users").unwrap();
        assert!(handle.location().starts_with("fixtures-users-"));
        handle.close().unwrap();
    }

    #[test]
    fn test_disk_clean_removes_location_after_close() {
        let registry = hooks();
        let factory = Factory::with_hooks(None, LevelOptions::new().clean(true), registry.clone())
            .unwrap()
            .in_dir(scratch("clean"));
        let handle = factory.open().unwrap();
        assert!(Path::new(handle.location()).is_dir());
        assert_eq!(registry.len(), 1);

        handle.close().unwrap();
        assert!(!Path::new(handle.location()).exists());
        assert!(registry.is_empty());
        let _ = std::fs::remove_dir_all(scratch("clean"));
    }

    #[test]
    fn test_disk_without_clean_keeps_location() {
        let factory = Factory::with_hooks(None, LevelOptions::new(), hooks())
            .unwrap()
            .in_dir(scratch("keep"));
        let handle = factory.open().unwrap();
        handle.put("k", &json!("v")).unwrap();
        handle.close().unwrap();
        assert!(Path::new(handle.location()).is_dir());
        std::fs::remove_dir_all(scratch("keep")).unwrap();
    }

    #[test]
    fn test_nested_disk_location_cleans_claimed_dir() {
        let factory = Factory::with_hooks(None, LevelOptions::new().clean(true), hooks())
            .unwrap()
            .in_dir(scratch("nested"));
        let handle = factory.open_named("sub").unwrap();
        let parent = Path::new(handle.location()).parent().unwrap().to_path_buf();
        assert!(handle.location().ends_with("sub"));
        handle.close().unwrap();
        assert!(!parent.exists());
        let _ = std::fs::remove_dir_all(scratch("nested"));
    }

    #[test]
    fn test_invalid_wrap_fails_before_any_resource() {
        let err = Factory::with_hooks(None, LevelOptions::new().wrap(json!(42)), hooks()).err().unwrap();
        assert!(matches!(err, LevelError::InvalidWrapperSpec { .. }));
    }

    #[test]
    fn test_missing_wrapper_fails_before_location_exists() {
        let dir = scratch("missing-wrapper");
        let factory = Factory::with_hooks(None, LevelOptions::new().wrap("nope"), hooks())
            .unwrap()
            .in_dir(&dir);
        assert!(matches!(factory.open(), Err(LevelError::ResourceUnavailable { .. })));
        assert!(!dir.exists());
    }

    #[test]
    fn test_wrapper_chain_applied() {
        let options = LevelOptions::new()
            .mem(true)
            .wrap(vec![WrapItem::pair("sublevel", json!({ "valueEncoding": "json" }))]);
        let factory = Factory::with_hooks(None, options, hooks()).unwrap();
        let handle = factory.open().unwrap();
        let subs = handle.surface::<Sublevels>().unwrap();
        subs.sublevel("a").unwrap().put("k", &json!([1, 2])).unwrap();
        assert_eq!(subs.sublevel("a").unwrap().get("k").unwrap(), Some(json!([1, 2])));
        handle.close().unwrap();
    }

    #[test]
    fn test_failed_wrapper_closes_base() {
        let registry = hooks();
        let seen: Arc<Mutex<Option<Db>>> = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let broken = Decorator::new("broken", move |handle, _| {
            *s.lock().unwrap() = Some(handle.db().clone());
            Err(LevelError::Wrapper("nope".into()))
        });
        let options = LevelOptions::new().mem(true).wrap(vec![WrapItem::bare(broken)]);
        let factory = Factory::with_hooks(None, options, registry.clone()).unwrap();
        assert!(matches!(factory.open(), Err(LevelError::Wrapper(_))));
        assert!(seen.lock().unwrap().as_ref().unwrap().is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_per_store_settings_override() {
        let factory = Factory::with_hooks(None, LevelOptions::new().mem(true).encoding("json"), hooks()).unwrap();
        let handle = factory
            .create(vec![CreateArg::options(StoreSettings::new().value_encoding("utf8"))])
            .unwrap();
        let enc = handle.db().encodings();
        assert_eq!(enc.value.to_string(), "utf8");
        assert_eq!(enc.key.to_string(), "json");
        handle.close().unwrap();
    }

    #[test]
    fn test_callback_receives_open_handle() {
        let factory = Factory::with_hooks(None, LevelOptions::new().mem(true), hooks()).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let handle = factory
            .create(vec![CreateArg::func(Box::new(move |outcome: std::result::Result<&Handle, &LevelError>| {
                *s.lock().unwrap() = Some(outcome.map(|h| h.is_open()).unwrap_or(false));
            }))])
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(true));
        handle.close().unwrap();
    }

    #[test]
    fn test_open_failure_reaches_callback_and_keeps_existing_store() {
        let registry = hooks();
        let dir = scratch("open-failure");
        let options = LevelOptions::new()
            .clean(true)
            .engine_option("errorIfExists", json!(true));
        let factory = Factory::with_hooks(Some("fixed"), options, registry.clone())
            .unwrap()
            .in_dir(&dir);
        // seed an existing store at the literal location
        let engine = crate::engine::default_disk_engine();
        let mut store = engine
            .open(&dir.join("fixed").to_string_lossy(), &Default::default())
            .unwrap();
        store.close().unwrap();

        let failed = Arc::new(Mutex::new(false));
        let f = failed.clone();
        let result = factory.create(vec![CreateArg::func(Box::new(move |outcome: std::result::Result<&Handle, &LevelError>| {
            *f.lock().unwrap() = outcome.is_err();
        }))]);
        assert!(matches!(result, Err(LevelError::Open { .. })));
        assert!(*failed.lock().unwrap());
        assert!(registry.is_empty());
        // the pre-existing store was never opened by this factory
        assert!(dir.join("fixed").join(crate::engine::disk::DATA_FILE).is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_open_leaves_live_store_alone() {
        let dir = scratch("shared-live");
        let keeper = Factory::with_hooks(Some("shared"), LevelOptions::new(), hooks())
            .unwrap()
            .in_dir(&dir);
        let cleaner = Factory::with_hooks(Some("shared"), LevelOptions::new().clean(true), hooks())
            .unwrap()
            .in_dir(&dir);

        let live = keeper.open().unwrap();
        live.put("k", &json!("v")).unwrap();

        let err = cleaner.open().err().unwrap();
        assert!(matches!(err, LevelError::Open { .. }));
        assert!(!err.is_configuration());
        assert!(Path::new(live.location()).join(crate::engine::disk::LOCK_FILE).is_file());

        live.close().unwrap();
        assert!(Path::new(live.location()).join(crate::engine::disk::DATA_FILE).is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_open_removes_empty_claimed_dir() {
        let dir = scratch("never-opened");
        let factory = Factory::with_hooks(Some("unused-*"), LevelOptions::new().clean(true), hooks())
            .unwrap()
            .in_dir(&dir);
        let failed = Arc::new(Mutex::new(None));
        let seen = failed.clone();

        // closed before the deferred open ran
        let scheduler = Scheduler::new();
        let handle = factory
            .create_deferred(
                &scheduler,
                vec![CreateArg::func(Box::new(move |outcome: std::result::Result<&Handle, &LevelError>| {
                    *seen.lock().unwrap() = Some(outcome.is_err());
                }))],
            )
            .unwrap();
        assert!(Path::new(handle.location()).is_dir());
        handle.close().unwrap();
        assert!(!Path::new(handle.location()).exists());

        scheduler.run_until_idle();
        assert_eq!(*failed.lock().unwrap(), Some(true));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_deferred_open_waits_for_tick() {
        let scheduler = Scheduler::new();
        let factory = Factory::with_hooks(None, LevelOptions::new().mem(true), hooks()).unwrap();
        let handle = factory.create_deferred(&scheduler, Vec::new()).unwrap();
        assert_eq!(handle.state(), OpenState::Pending);
        scheduler.run_until_idle();
        assert!(handle.is_open());
        handle.close().unwrap();
    }

    #[test]
    fn test_forgotten_store_closed_by_exit_hooks() {
        let registry = hooks();
        let factory = Factory::with_hooks(None, LevelOptions::new().clean(true), registry.clone())
            .unwrap()
            .in_dir(scratch("forgotten"));
        let location = factory.open().unwrap().location().to_string();
        assert!(Path::new(&location).is_dir());

        registry.run_pending();
        assert!(!Path::new(&location).exists());
        let _ = std::fs::remove_dir_all(scratch("forgotten"));
    }
}
