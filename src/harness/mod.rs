//! Test harness: a cooperative scheduler, a small TAP-style runner and the
//! coordinator that binds a store's lifecycle to a test's.

pub mod coordinator;
pub mod scheduler;
pub mod tape;

pub use coordinator::{body, InjectedChecks, RunPhase, TestArg, TestContext, TestFactory, TestFn, TestOptions, ANONYMOUS};
pub use scheduler::Scheduler;
pub use tape::{Assertion, RunOptions, Suite, SuiteReport, Test, TestReport};
