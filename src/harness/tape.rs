//! Minimal TAP-style test runner.
//!
//! A [`Suite`] runs registered tests one at a time on a cooperative
//! [`Scheduler`]. Each [`Test`] offers plan/assert/end primitives, result and
//! end listeners, and nested sub-tests. A test ends when `end` is called, when
//! its plan is reached, or (without a plan) after its sub-tests finish.
//! Sub-tests run once their parent is finishing, before the parent's end
//! listeners fire.

use crate::harness::scheduler::Scheduler;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Upper bound for tests registered without a timeout
const UNBOUNDED: Duration = Duration::from_secs(24 * 60 * 60);

/// Grace period for a forced end to settle
const FORCE_GRACE: Duration = Duration::from_millis(100);

/// One assertion result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assertion {
    pub ok: bool,
    pub name: String,
    pub skip: bool,
    pub detail: Option<String>,
}

impl Assertion {
    pub fn new(ok: bool, name: &str) -> Self {
        Self {
            ok,
            name: name.to_string(),
            skip: false,
            detail: None,
        }
    }

    fn failed(name: &str, detail: Option<String>) -> Self {
        Self {
            detail,
            ..Self::new(false, name)
        }
    }
}

pub type TestBody = Box<dyn FnOnce(Test) + Send>;
type ResultListener = Arc<dyn Fn(&Assertion) + Send + Sync>;
type Notify = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
enum Entry {
    Assertion(Assertion),
    Comment(String),
    Subtest(Test),
}

#[derive(Default)]
struct TestState {
    plan: Option<usize>,
    entries: Vec<Entry>,
    end_called: bool,
    auto_end_scheduled: bool,
    finishing: bool,
    ended: bool,
    queued: VecDeque<(Test, TestBody)>,
    running: Option<Test>,
    idle_waiters: Vec<Notify>,
}

impl TestState {
    fn count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Assertion(_)))
            .count()
    }
}

struct TestInner {
    name: String,
    scheduler: Scheduler,
    state: Mutex<TestState>,
    result_listeners: Mutex<Vec<ResultListener>>,
    end_listeners: Mutex<Vec<Notify>>,
    finished_listeners: Mutex<Vec<Notify>>,
}

/// A running test
#[derive(Clone)]
pub struct Test {
    inner: Arc<TestInner>,
}

impl Test {
    pub fn new(name: &str, scheduler: &Scheduler) -> Self {
        Self {
            inner: Arc::new(TestInner {
                name: name.to_string(),
                scheduler: scheduler.clone(),
                state: Mutex::new(TestState::default()),
                result_listeners: Mutex::new(Vec::new()),
                end_listeners: Mutex::new(Vec::new()),
                finished_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TestState) -> T) -> Option<T> {
        self.inner.state.lock().ok().map(|mut st| f(&mut st))
    }

    /// Declare the number of assertions this test will make
    pub fn plan(&self, n: usize) {
        self.with_state(|st| st.plan = Some(n));
        debug!("{}: plan {}", self.name(), n);
    }

    pub fn planned(&self) -> Option<usize> {
        self.with_state(|st| st.plan).flatten()
    }

    /// Assertions recorded so far
    pub fn count(&self) -> usize {
        self.with_state(|st| st.count()).unwrap_or(0)
    }

    pub fn is_ended(&self) -> bool {
        self.with_state(|st| st.ended).unwrap_or(true)
    }

    pub fn end_called(&self) -> bool {
        self.with_state(|st| st.end_called).unwrap_or(false)
    }

    pub fn assertions(&self) -> Vec<Assertion> {
        self.with_state(|st| {
            st.entries
                .iter()
                .filter_map(|e| match e {
                    Entry::Assertion(a) => Some(a.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn record(&self, assertion: Assertion) {
        debug!(
            "{}: {} {}",
            self.name(),
            if assertion.ok { "ok" } else { "not ok" },
            assertion.name
        );
        let recorded = self.with_state(|st| {
            let after_end = st.ended;
            st.entries.push(Entry::Assertion(assertion.clone()));
            if after_end {
                st.entries.push(Entry::Assertion(Assertion::failed(
                    &format!("assertion after end: {}", assertion.name),
                    None,
                )));
                return (true, false);
            }
            let reached = st.plan == Some(st.count()) && !st.auto_end_scheduled && !st.finishing;
            if reached {
                st.auto_end_scheduled = true;
            }
            (false, reached)
        });
        let (after_end, reached) = match recorded {
            Some(r) => r,
            None => return,
        };
        if after_end {
            warn!("{}: assertion after end", self.name());
            return;
        }

        let listeners: Vec<ResultListener> = self
            .inner
            .result_listeners
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener(&assertion);
        }

        if reached {
            let test = self.clone();
            self.inner.scheduler.defer(move || test.finish());
        }
    }

    pub fn ok(&self, value: bool, msg: &str) {
        self.record(Assertion::new(value, msg));
    }

    pub fn not_ok(&self, value: bool, msg: &str) {
        self.record(Assertion::new(!value, msg));
    }

    pub fn pass(&self, msg: &str) {
        self.record(Assertion::new(true, msg));
    }

    pub fn fail(&self, msg: &str) {
        self.record(Assertion::new(false, msg));
    }

    pub fn equal<T: PartialEq + fmt::Debug>(&self, actual: T, expected: T, msg: &str) {
        if actual == expected {
            self.record(Assertion::new(true, msg));
        } else {
            let detail = format!("expected: {:?}\nactual:   {:?}", expected, actual);
            self.record(Assertion::failed(msg, Some(detail)));
        }
    }

    /// Record a skipped assertion
    pub fn skip(&self, msg: &str) {
        self.record(Assertion {
            skip: true,
            ..Assertion::new(true, msg)
        });
    }

    pub fn comment(&self, msg: &str) {
        self.with_state(|st| st.entries.push(Entry::Comment(msg.to_string())));
    }

    /// Listen to every assertion recorded from now on
    pub fn on_result<F>(&self, listener: F)
    where
        F: Fn(&Assertion) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.inner.result_listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Runs once when the test ends, after its sub-tests and before the plan
    /// is checked. Assertions made here still count.
    pub fn on_end<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut listeners) = self.inner.end_listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Runs once the test has fully ended; immediately if it already has
    pub fn on_finished<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let listener: Notify = Box::new(listener);
        let late = match self.inner.finished_listeners.lock() {
            Ok(mut listeners) if !self.is_ended() => {
                listeners.push(listener);
                None
            }
            _ => Some(listener),
        };
        if let Some(listener) = late {
            listener();
        }
    }

    /// End the test. A second call records a failure.
    pub fn end(&self) {
        let already = self
            .with_state(|st| std::mem::replace(&mut st.end_called, true))
            .unwrap_or(true);
        if already {
            self.fail(".end() already called");
            return;
        }
        self.finish();
    }

    /// Queue a sub-test. Sub-tests run one at a time once the parent is
    /// finishing. A parent with no plan that has not ended finishes on the
    /// next tick, which runs its sub-tests first.
    pub fn subtest<F>(&self, name: &str, body: F) -> Test
    where
        F: FnOnce(Test) + Send + 'static,
    {
        let child = Test::new(name, &self.inner.scheduler);
        self.with_state(|st| {
            st.entries.push(Entry::Subtest(child.clone()));
            st.queued.push_back((child.clone(), Box::new(body)));
        });

        let parent = self.clone();
        self.inner.scheduler.defer(move || {
            if parent.planned().is_none() && !parent.end_called() {
                parent.finish();
            }
        });
        child
    }

    /// Run `then` once every sub-test queued so far has finished
    pub fn drain_subtests<F>(&self, then: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.with_state(|st| st.idle_waiters.push(Box::new(then)));
        self.pump();
    }

    fn pump(&self) {
        enum Step {
            Busy,
            Start(Test, TestBody),
            Idle(Vec<Notify>),
        }

        let step = self.with_state(|st| {
            if st.running.is_some() {
                return Step::Busy;
            }
            match st.queued.pop_front() {
                Some((child, body)) => {
                    st.running = Some(child.clone());
                    Step::Start(child, body)
                }
                None => Step::Idle(std::mem::take(&mut st.idle_waiters)),
            }
        });

        match step {
            Some(Step::Start(child, body)) => {
                let parent = self.clone();
                child.on_finished(move || {
                    parent.with_state(|st| st.running = None);
                    parent.pump();
                });
                child.run(body);
            }
            Some(Step::Idle(waiters)) => {
                for waiter in waiters {
                    waiter();
                }
            }
            Some(Step::Busy) | None => {}
        }
    }

    /// Invoke `body` with this test on the next tick
    pub fn run<F>(&self, body: F)
    where
        F: FnOnce(Test) + Send + 'static,
    {
        let test = self.clone();
        self.inner.scheduler.defer(move || body(test));
    }

    pub(crate) fn finish(&self) {
        let start = self
            .with_state(|st| {
                if st.finishing || st.ended {
                    false
                } else {
                    st.finishing = true;
                    true
                }
            })
            .unwrap_or(false);
        if !start {
            return;
        }
        let test = self.clone();
        self.drain_subtests(move || test.finish_now());
    }

    fn finish_now(&self) {
        let listeners = self
            .inner
            .end_listeners
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }

        self.with_state(|st| {
            if let Some(plan) = st.plan {
                let count = st.count();
                if plan != count {
                    st.entries.push(Entry::Assertion(Assertion::failed(
                        "plan != count",
                        Some(format!("expected: {}\nactual:   {}", plan, count)),
                    )));
                }
            }
            st.ended = true;
        });

        let finished = self
            .inner
            .finished_listeners
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default();
        for listener in finished {
            listener();
        }
    }

    /// End the test with a failure, abandoning queued sub-tests and forcing
    /// a running one to end first.
    pub(crate) fn force_end(&self, reason: &str) {
        warn!("{}: {}", self.name(), reason);
        let running = self.with_state(|st| {
            st.entries
                .push(Entry::Assertion(Assertion::failed(reason, None)));
            for (child, _) in st.queued.drain(..) {
                st.entries
                    .push(Entry::Comment(format!("sub-test not run: {}", child.name())));
            }
            st.running.clone()
        });
        if let Some(child) = running.flatten() {
            child.force_end(reason);
        }
        self.finish();
    }

    pub fn report(&self) -> TestReport {
        let entries = self
            .with_state(|st| st.entries.clone())
            .unwrap_or_default();
        TestReport {
            name: self.inner.name.clone(),
            skipped: false,
            entries: entries
                .into_iter()
                .map(|e| match e {
                    Entry::Assertion(a) => ReportEntry::Assertion(a),
                    Entry::Comment(c) => ReportEntry::Comment(c),
                    Entry::Subtest(t) => ReportEntry::Subtest(t.report()),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.inner.name)
            .field("plan", &self.planned())
            .field("count", &self.count())
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum ReportEntry {
    Assertion(Assertion),
    Comment(String),
    Subtest(TestReport),
}

/// Outcome of one test, including its sub-tests
#[derive(Clone, Debug)]
pub struct TestReport {
    pub name: String,
    pub skipped: bool,
    pub entries: Vec<ReportEntry>,
}

impl TestReport {
    /// This test's own assertions
    pub fn assertions(&self) -> Vec<&Assertion> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ReportEntry::Assertion(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn assertion_names(&self) -> Vec<String> {
        self.assertions().iter().map(|a| a.name.clone()).collect()
    }

    pub fn subtests(&self) -> Vec<&TestReport> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ReportEntry::Subtest(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Assertions including sub-tests: (total, failed)
    pub fn tally(&self) -> (usize, usize) {
        self.entries.iter().fold((0, 0), |(total, failed), e| match e {
            ReportEntry::Assertion(a) => (total + 1, failed + usize::from(!a.ok)),
            ReportEntry::Subtest(t) => {
                let (t_total, t_failed) = t.tally();
                (total + t_total, failed + t_failed)
            }
            ReportEntry::Comment(_) => (total, failed),
        })
    }

    pub fn passed(&self) -> bool {
        self.tally().1 == 0
    }

    fn write_tap(&self, out: &mut String, id: &mut usize) {
        if self.skipped {
            out.push_str(&format!("# SKIP {}\n", self.name));
            return;
        }
        out.push_str(&format!("# {}\n", self.name));
        for entry in &self.entries {
            match entry {
                ReportEntry::Assertion(a) => {
                    *id += 1;
                    let status = if a.ok { "ok" } else { "not ok" };
                    let skip = if a.skip { " # SKIP" } else { "" };
                    out.push_str(&format!("{} {} {}{}\n", status, id, a.name, skip));
                    if let Some(detail) = &a.detail {
                        out.push_str("  ---\n");
                        for line in detail.lines() {
                            out.push_str(&format!("    {}\n", line));
                        }
                        out.push_str("  ...\n");
                    }
                }
                ReportEntry::Comment(c) => out.push_str(&format!("# {}\n", c)),
                ReportEntry::Subtest(t) => t.write_tap(out, id),
            }
        }
    }
}

/// Per-test runner options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip: bool,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Registered {
    name: String,
    options: RunOptions,
    only: bool,
    body: TestBody,
}

/// An ordered collection of tests sharing one scheduler
pub struct Suite {
    scheduler: Scheduler,
    tests: Vec<Registered>,
}

impl Default for Suite {
    fn default() -> Self {
        Self::new()
    }
}

impl Suite {
    pub fn new() -> Self {
        Self::with_scheduler(Scheduler::new())
    }

    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            tests: Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn register(&mut self, name: &str, options: RunOptions, only: bool, body: TestBody) {
        self.tests.push(Registered {
            name: name.to_string(),
            options,
            only,
            body,
        });
    }

    pub fn test<F>(&mut self, name: &str, options: RunOptions, body: F)
    where
        F: FnOnce(Test) + Send + 'static,
    {
        self.register(name, options, false, Box::new(body));
    }

    pub fn skip<F>(&mut self, name: &str, options: RunOptions, body: F)
    where
        F: FnOnce(Test) + Send + 'static,
    {
        self.register(name, options.skip(true), false, Box::new(body));
    }

    /// Once any test is registered with `only`, just those tests run
    pub fn only<F>(&mut self, name: &str, options: RunOptions, body: F)
    where
        F: FnOnce(Test) + Send + 'static,
    {
        self.register(name, options, true, Box::new(body));
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Run every selected test to completion, one at a time
    pub fn run(self) -> SuiteReport {
        let Suite { scheduler, tests } = self;
        let exclusive = tests.iter().any(|t| t.only);
        let mut reports = Vec::new();

        for registered in tests {
            if exclusive && !registered.only {
                continue;
            }
            if registered.options.skip {
                reports.push(TestReport {
                    name: registered.name,
                    skipped: true,
                    entries: Vec::new(),
                });
                continue;
            }
            reports.push(run_one(&scheduler, registered));
        }
        SuiteReport { tests: reports }
    }
}

fn run_one(scheduler: &Scheduler, registered: Registered) -> TestReport {
    let test = Test::new(&registered.name, scheduler);
    test.run(registered.body);

    let started = Instant::now();
    let budget = registered.options.timeout.unwrap_or(UNBOUNDED);
    let watched = test.clone();
    let ended = scheduler.run_until(started + budget, move || watched.is_ended());

    if !ended {
        let reason = match registered.options.timeout {
            Some(timeout) if started.elapsed() >= timeout => {
                format!("test timed out after {}ms", timeout.as_millis())
            }
            _ => "test exited without ending".to_string(),
        };
        test.force_end(&reason);
        let watched = test.clone();
        scheduler.run_until(Instant::now() + FORCE_GRACE, move || watched.is_ended());
    }
    test.report()
}

/// Outcome of a suite run
#[derive(Clone, Debug)]
pub struct SuiteReport {
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    pub fn test(&self, name: &str) -> Option<&TestReport> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Assertions across all tests: (total, failed)
    pub fn tally(&self) -> (usize, usize) {
        self.tests.iter().fold((0, 0), |(total, failed), t| {
            let (t_total, t_failed) = t.tally();
            (total + t_total, failed + t_failed)
        })
    }

    pub fn passed(&self) -> bool {
        self.tally().1 == 0
    }

    pub fn to_tap(&self) -> String {
        let mut out = String::from("TAP version 13\n");
        let mut id = 0;
        for test in &self.tests {
            test.write_tap(&mut out, &mut id);
        }
        let (total, failed) = self.tally();
        out.push_str(&format!("\n1..{}\n# tests {}\n# pass  {}\n", total, total, total - failed));
        if failed > 0 {
            out.push_str(&format!("# fail  {}\n", failed));
        } else {
            out.push_str("\n# ok\n");
        }
        out
    }

    /// Panic with the TAP output if any assertion failed
    pub fn assert_passed(&self) {
        if !self.passed() {
            panic!("suite failed\n{}", self.to_tap());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_plan_auto_ends() {
        let mut suite = Suite::new();
        suite.test("planned", RunOptions::default(), |t| {
            t.plan(2);
            t.ok(true, "one");
            t.equal(2, 2, "two");
        });
        let report = suite.run();
        report.assert_passed();
        assert_eq!(report.tally(), (2, 0));
    }

    #[test]
    fn test_plan_mismatch_fails() {
        let mut suite = Suite::new();
        suite.test("short", RunOptions::default(), |t| {
            t.plan(3);
            t.pass("only one");
            t.end();
        });
        let report = suite.run();
        assert!(!report.passed());
        assert!(report.test("short").unwrap().assertion_names().contains(&"plan != count".to_string()));
    }

    #[test]
    fn test_exited_without_ending() {
        let mut suite = Suite::new();
        suite.test("dangling", RunOptions::default(), |t| {
            t.pass("started");
        });
        let report = suite.run();
        let names = report.test("dangling").unwrap().assertion_names();
        assert!(names.contains(&"test exited without ending".to_string()));
    }

    #[test]
    fn test_timeout() {
        let mut suite = Suite::new();
        let scheduler = suite.scheduler().clone();
        suite.test("slow", RunOptions::default().timeout(Duration::from_millis(10)), move |t| {
            scheduler.defer_for(Duration::from_secs(60), move || t.end());
        });
        let report = suite.run();
        assert_eq!(
            report.test("slow").unwrap().assertion_names(),
            vec!["test timed out after 10ms".to_string()]
        );
    }

    #[test]
    fn test_double_end_fails() {
        let mut suite = Suite::new();
        suite.test("twice", RunOptions::default(), |t| {
            t.end();
            t.end();
        });
        let report = suite.run();
        assert!(!report.passed());
    }

    #[test]
    fn test_skip_and_only() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut suite = Suite::new();
        let r = ran.clone();
        suite.test("not selected", RunOptions::default(), move |t| {
            r.fetch_add(1, Ordering::SeqCst);
            t.end();
        });
        let r = ran.clone();
        suite.only("selected", RunOptions::default(), move |t| {
            r.fetch_add(10, Ordering::SeqCst);
            t.end();
        });
        let report = suite.run();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(report.tests.len(), 1);

        let mut suite = Suite::new();
        suite.skip("skipped", RunOptions::default(), |_| panic!("must not run"));
        let report = suite.run();
        assert!(report.tests[0].skipped);
        assert!(report.to_tap().contains("# SKIP skipped"));
    }

    #[test]
    fn test_result_and_end_listeners() {
        let mut suite = Suite::new();
        let results = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (r, o) = (results.clone(), order.clone());
        suite.test("listeners", RunOptions::default(), move |t| {
            t.on_result(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            });
            let (o1, tt) = (o.clone(), t.clone());
            t.on_end(move || {
                // still counts before the plan check
                tt.pass("from end listener");
                o1.lock().unwrap().push("end");
            });
            t.plan(2);
            t.pass("body");
            t.end();
        });
        let report = suite.run();
        report.assert_passed();
        assert_eq!(results.load(Ordering::SeqCst), 2);
        assert_eq!(*order.lock().unwrap(), vec!["end"]);
    }

    #[test]
    fn test_parent_without_plan_finishes_after_subtests() {
        let mut suite = Suite::new();
        suite.test("parent", RunOptions::default(), |t| {
            t.pass("parent body");
            t.subtest("child a", |c| {
                c.pass("a");
                c.end();
            });
            t.subtest("child b", |c| {
                c.plan(1);
                c.pass("b");
            });
        });
        let report = suite.run();
        report.assert_passed();
        let parent = report.test("parent").unwrap();
        assert_eq!(parent.subtests().len(), 2);
        assert_eq!(parent.tally(), (3, 0));
    }

    #[test]
    fn test_drain_waits_for_running_subtest() {
        let scheduler = Scheduler::new();
        let parent = Test::new("parent", &scheduler);
        parent.plan(1);
        let sched = scheduler.clone();
        parent.subtest("slow child", move |c| {
            sched.defer_for(Duration::from_millis(5), move || c.end());
        });
        let drained = Arc::new(AtomicUsize::new(0));
        let d = drained.clone();
        parent.drain_subtests(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(drained.load(Ordering::SeqCst), 0);
        scheduler.run_until_idle();
        assert_eq!(drained.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_assertion_after_end_fails() {
        let scheduler = Scheduler::new();
        let t = Test::new("late", &scheduler);
        t.end();
        assert!(t.is_ended());
        t.pass("too late");
        assert!(t.report().assertions().iter().any(|a| !a.ok));
    }

    #[test]
    fn test_tap_output() {
        let mut suite = Suite::new();
        suite.test("tap", RunOptions::default(), |t| {
            t.ok(true, "fine");
            t.equal(1, 2, "numbers");
            t.comment("note");
            t.end();
        });
        let tap = suite.run().to_tap();
        assert!(tap.starts_with("TAP version 13\n# tap\nok 1 fine\nnot ok 2 numbers\n"));
        assert!(tap.contains("    expected: 2\n"));
        assert!(tap.contains("# note\n"));
        assert!(tap.contains("1..2\n# tests 2\n# pass  1\n# fail  1\n"));
    }
}
