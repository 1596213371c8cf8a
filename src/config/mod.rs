//! Configuration
//!
//! Option types, the error taxonomy, option normalization and JSON config
//! loading.

pub mod file;
pub mod normalize;
pub mod types;

pub use file::FactoryConfig;
pub use normalize::{normalize, Encodings, Normalized};
pub use types::{Codec, LevelError, LevelOptions, Result, StoreSettings};
