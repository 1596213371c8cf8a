//! tmplevel: ephemeral, uniquely-named key-value stores for tests and
//! short-lived programs.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Errors, codecs, store settings and factory options
//! - [`config::normalize`]: Backend selection and option normalization
//! - [`config::file`]: JSON factory configuration files
//!
//! ## Naming ([`location`])
//! - [`location::generator`]: Unique name tokens
//! - [`location`]: Template expansion and location claiming
//!
//! ## Storage ([`engine`], [`handle`])
//! - [`engine::memory`]: Process-wide in-memory engine
//! - [`engine::disk`]: Directory-backed engine
//! - [`handle`]: Open/close state machine and the caller-facing handle
//!
//! ## Lifecycle ([`lifecycle`])
//! - [`lifecycle::hooks`]: Process exit hooks
//! - [`lifecycle::managed`]: Close-then-delete with single-fire semantics
//! - [`lifecycle::remove`]: Tree removal
//!
//! ## Composition ([`wrap`], [`factory`])
//! - [`wrap`]: Wrapper chain normalization and composition
//! - [`factory`]: Store creation
//!
//! ## Test harness ([`harness`])
//! - [`harness::scheduler`]: Cooperative task queue
//! - [`harness::tape`]: TAP-style test runner
//! - [`harness::coordinator`]: Store-per-test coordination

pub mod args;
pub mod cli;
pub mod config;
pub mod engine;
pub mod factory;
pub mod handle;
pub mod harness;
pub mod lifecycle;
pub mod location;
pub mod wrap;

pub use config::types::{Codec, LevelError, LevelOptions, Result, StoreSettings};
pub use config::FactoryConfig;
pub use factory::{CreateArg, Factory};
pub use handle::{Handle, OpenState};
pub use harness::{body, Suite, TestArg, TestFactory, TestOptions};
pub use location::Mode;

/// Initialize `env_logger` once; later calls are no-ops
pub fn init_logging() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}
