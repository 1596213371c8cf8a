/// Test harness coordinator
///
/// Runs one test body around a freshly created store and reconciles the
/// test's completion with the store's close:
/// - the store is created when the test starts and closed when the test
///   ends, either explicitly or once its planned assertions are in;
/// - the harness adds its own assertions (`created`, `db closed`,
///   `deleted`) and folds them into the declared plan;
/// - `db closed` is always reported before the test's end reaches the
///   runner, and the store closes only after queued sub-tests finish.
use crate::args::{Arg, Call};
use crate::config::types::{LevelError, LevelOptions, Result, StoreSettings};
use crate::config::FactoryConfig;
use crate::factory::{CreateArg, Factory};
use crate::handle::Handle;
use crate::harness::scheduler::Scheduler;
use crate::harness::tape::{RunOptions, Suite, Test};
use crate::lifecycle::{process_hooks, HookRegistry};
use crate::location::Mode;
use log::{debug, warn};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default name for tests registered without one
pub const ANONYMOUS: &str = "(anonymous)";

/// Assertions the harness makes on its own, as a property of configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InjectedChecks {
    /// `created: <loc>`; only stores with a filesystem footprint
    pub check_created: bool,
    /// `deleted: <loc>`; only cleaned stores with a filesystem footprint
    pub check_deleted: bool,
}

impl InjectedChecks {
    pub fn new(mode: Mode, clean: bool) -> Self {
        let on_disk = mode == Mode::Disk;
        Self {
            check_created: on_disk,
            check_deleted: on_disk && clean,
        }
    }

    /// Number of injected assertions; `db closed` is always one of them
    pub fn count(&self) -> usize {
        usize::from(self.check_created) + usize::from(self.check_deleted) + 1
    }

    /// Plan forwarded to the runner when the test declares `n`
    pub fn effective_plan(&self, n: usize) -> usize {
        n + self.count()
    }
}

/// Per-test options. `skip` and `timeout` go to the runner, `wait`
/// overrides the harness default and `store` overrides store settings.
#[derive(Clone, Debug, Default)]
pub struct TestOptions {
    pub wait: Option<bool>,
    pub skip: bool,
    pub timeout: Option<Duration>,
    pub store: StoreSettings,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(mut self, store: StoreSettings) -> Self {
        self.store = store;
        self
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            skip: self.skip,
            timeout: self.timeout,
        }
    }
}

pub type TestFn = Box<dyn FnOnce(TestContext, Handle) + Send>;

/// Positional argument accepted by [`TestFactory`] entry points
pub type TestArg = Arg<TestOptions, TestFn>;

/// Wrap a closure as a test body argument
pub fn body<F>(f: F) -> TestArg
where
    F: FnOnce(TestContext, Handle) + Send + 'static,
{
    Arg::Func(Box::new(f))
}

/// Where a coordinated run is, derived from its flags and the store state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// Waiting for the store to open
    Pending,
    Running,
    /// A completion trigger fired; the store is closing
    Ending,
    /// Store closed; the runner has not seen the end yet
    Closed,
    Done,
}

struct RunState {
    checks: InjectedChecks,
    location: String,
    pending: AtomicIsize,
    ended: AtomicBool,
    closed: AtomicBool,
}

/// The test object handed to a coordinated test body.
///
/// `plan` and `end` are intercepted; everything else is forwarded to the
/// underlying runner test.
#[derive(Clone)]
pub struct TestContext {
    test: Test,
    handle: Handle,
    run: Arc<RunState>,
}

impl TestContext {
    /// Declare `n` assertions; the harness adds its own on top
    pub fn plan(&self, n: usize) {
        self.run.pending.store(n as isize, Ordering::SeqCst);
        self.test.plan(self.run.checks.effective_plan(n));
    }

    /// End the test. The store is closed first; the runner sees the end
    /// only after the close finished.
    pub fn end(&self) {
        if self.run.closed.load(Ordering::SeqCst) {
            self.test.end();
            return;
        }
        let ctx = self.clone();
        self.test.drain_subtests(move || {
            // a close failure is recorded before the end reaches the runner
            ctx.close_store();
            let test = ctx.test.clone();
            ctx.handle.on_closed(move || test.end());
        });
    }

    pub fn ok(&self, value: bool, msg: &str) {
        self.test.ok(value, msg)
    }

    pub fn not_ok(&self, value: bool, msg: &str) {
        self.test.not_ok(value, msg)
    }

    pub fn pass(&self, msg: &str) {
        self.test.pass(msg)
    }

    pub fn fail(&self, msg: &str) {
        self.test.fail(msg)
    }

    pub fn equal<T: PartialEq + fmt::Debug>(&self, actual: T, expected: T, msg: &str) {
        self.test.equal(actual, expected, msg)
    }

    pub fn skip(&self, msg: &str) {
        self.test.skip(msg)
    }

    pub fn comment(&self, msg: &str) {
        self.test.comment(msg)
    }

    /// Sub-tests are plain runner tests; the store stays open until they
    /// have finished.
    pub fn subtest<F>(&self, name: &str, body: F) -> Test
    where
        F: FnOnce(Test) + Send + 'static,
    {
        self.test.subtest(name, body)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn location(&self) -> &str {
        &self.run.location
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.test.scheduler()
    }

    /// The underlying runner test
    pub fn raw(&self) -> &Test {
        &self.test
    }

    pub fn checks(&self) -> InjectedChecks {
        self.run.checks
    }

    pub fn phase(&self) -> RunPhase {
        if self.test.is_ended() {
            RunPhase::Done
        } else if self.run.closed.load(Ordering::SeqCst) {
            RunPhase::Closed
        } else if self.run.ended.load(Ordering::SeqCst) {
            RunPhase::Ending
        } else if self.handle.is_open() {
            RunPhase::Running
        } else {
            RunPhase::Pending
        }
    }

    fn close_store(&self) {
        if let Err(e) = self.handle.close() {
            warn!("Closing {} failed: {}", self.run.location, e);
            self.test.fail(&format!("close failed: {}", e));
        }
    }

    /// First completion trigger closes the store, once queued sub-tests
    /// are done. Later triggers are ignored.
    fn on_end(&self) {
        if self.run.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.run.closed.load(Ordering::SeqCst) {
            return;
        }
        let ctx = self.clone();
        self.test.drain_subtests(move || ctx.close_store());
    }

    /// Single-fire close completion: report `db closed`, then `deleted`
    fn on_close(&self) {
        if self.run.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.test.ok(true, "db closed");
        if self.run.checks.check_deleted {
            let loc = &self.run.location;
            self.test.not_ok(Path::new(loc).exists(), &format!("deleted: {}", loc));
        }
    }

    fn on_result(&self) {
        if self.run.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.on_end();
        }
    }
}

/// Builds coordinated test runs from one store factory
pub struct TestFactory {
    factory: Arc<Factory>,
    checks: InjectedChecks,
    wait: bool,
}

impl TestFactory {
    pub fn new(template: Option<&str>, options: LevelOptions) -> Result<Self> {
        Self::with_hooks(template, options, process_hooks())
    }

    pub fn with_hooks(template: Option<&str>, options: LevelOptions, hooks: Arc<HookRegistry>) -> Result<Self> {
        Ok(Self::from_factory(Factory::with_hooks(template, options, hooks)?))
    }

    pub fn from_factory(factory: Factory) -> Self {
        let checks = InjectedChecks::new(factory.mode(), factory.clean());
        Self {
            factory: Arc::new(factory),
            checks,
            wait: true,
        }
    }

    pub fn from_config(config: &FactoryConfig) -> Result<Self> {
        let harness = Self::from_factory(Factory::from_config(config)?);
        Ok(harness.wait(config.wait.unwrap_or(true)))
    }

    /// Default for whether test bodies wait for the store to open
    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn checks(&self) -> InjectedChecks {
        self.checks
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Produce a runnable for one test. A name argument becomes the store's
    /// sub-name. Fails if no body is given.
    pub fn wrap<I>(&self, args: I) -> Result<impl FnOnce(Test) + Send + 'static>
    where
        I: IntoIterator<Item = TestArg>,
    {
        let call = Call::classify(args);
        let body = call
            .func
            .ok_or_else(|| LevelError::Config("test is not a function".to_string()))?;
        let options = call.options.unwrap_or_default();
        let wait = options.wait.unwrap_or(self.wait);
        let factory = self.factory.clone();
        let checks = self.checks;
        let sub = call.name;

        Ok(move |test: Test| run(test, factory, checks, wait, sub, options.store, body))
    }

    /// Register a coordinated test with `suite`
    pub fn test<I>(&self, suite: &mut Suite, args: I) -> Result<()>
    where
        I: IntoIterator<Item = TestArg>,
    {
        let (name, run_options, runnable) = self.registration(args, false)?;
        suite.test(&name, run_options, runnable);
        Ok(())
    }

    pub fn skip<I>(&self, suite: &mut Suite, args: I) -> Result<()>
    where
        I: IntoIterator<Item = TestArg>,
    {
        let (name, run_options, runnable) = self.registration(args, true)?;
        suite.test(&name, run_options, runnable);
        Ok(())
    }

    pub fn only<I>(&self, suite: &mut Suite, args: I) -> Result<()>
    where
        I: IntoIterator<Item = TestArg>,
    {
        let (name, run_options, runnable) = self.registration(args, false)?;
        suite.only(&name, run_options, runnable);
        Ok(())
    }

    fn registration<I>(&self, args: I, skip: bool) -> Result<(String, RunOptions, impl FnOnce(Test) + Send + 'static)>
    where
        I: IntoIterator<Item = TestArg>,
    {
        let call = Call::classify(args);
        let name = call.name.unwrap_or_else(|| ANONYMOUS.to_string());
        let mut options = call.options.unwrap_or_default();
        if skip {
            options.skip = true;
        }
        let run_options = options.run_options();

        let mut forwarded = vec![TestArg::options(options)];
        if let Some(body) = call.func {
            forwarded.push(Arg::Func(body));
        }
        let runnable = self.wrap(forwarded)?;
        Ok((name, run_options, runnable))
    }
}

fn run(
    test: Test,
    factory: Arc<Factory>,
    checks: InjectedChecks,
    wait: bool,
    sub: Option<String>,
    store: StoreSettings,
    body: TestFn,
) {
    let mut args = vec![CreateArg::options(store)];
    if let Some(sub) = sub {
        args.push(CreateArg::Name(sub));
    }

    let handle = match factory.create_deferred(test.scheduler(), args) {
        Ok(handle) => handle,
        Err(e) => {
            test.fail(&format!("create failed: {}", e));
            test.end();
            return;
        }
    };

    let location = handle.location().to_string();
    debug!("Running {} against {}", test.name(), location);
    let ctx = TestContext {
        test: test.clone(),
        handle: handle.clone(),
        run: Arc::new(RunState {
            checks,
            location: location.clone(),
            pending: AtomicIsize::new(0),
            ended: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }),
    };

    let on_close = ctx.clone();
    handle.on_closed(move || on_close.on_close());

    if checks.check_created {
        test.ok(Path::new(&location).exists(), &format!("created: {}", location));
    }

    let on_end = ctx.clone();
    test.on_end(move || on_end.on_end());
    let on_result = ctx.clone();
    test.on_result(move |_| on_result.on_result());

    if !wait {
        body(ctx, handle);
    } else if handle.is_open() {
        let scheduler = test.scheduler().clone();
        scheduler.defer(move || body(ctx, handle));
    } else {
        let started = handle.clone();
        handle.on_open(move |err| match err {
            None => body(ctx, started),
            Some(e) => {
                ctx.fail(&format!("open failed: {}", e));
                ctx.end();
            }
        });
    }
}
