/// Unique name token generators
use crate::config::types::{LevelError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Last monotonic token handed out in this process (microseconds)
static LAST_MONOTONIC: AtomicU64 = AtomicU64::new(0);

/// Environment override for the default generator tag
pub const GENERATOR_ENV: &str = "TMPLEVEL_GEN";

/// Generator strategy tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GeneratorTag {
    /// Time-seeded, strictly increasing, fixed-width hex
    #[default]
    Monotonic,
    /// Short random hex token
    Random,
    /// Short random lowercase-letter token
    Alpha,
}

impl GeneratorTag {
    pub fn token(&self) -> String {
        match self {
            GeneratorTag::Monotonic => monotonic_token(),
            GeneratorTag::Random => random_token(),
            GeneratorTag::Alpha => alpha_token(),
        }
    }
}

impl FromStr for GeneratorTag {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monotonic" | "timestamp" => Ok(GeneratorTag::Monotonic),
            "random" | "hat" => Ok(GeneratorTag::Random),
            "alpha" => Ok(GeneratorTag::Alpha),
            other => Err(LevelError::Config(format!("Unknown name generator: {}", other))),
        }
    }
}

impl fmt::Display for GeneratorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeneratorTag::Monotonic => "monotonic",
            GeneratorTag::Random => "random",
            GeneratorTag::Alpha => "alpha",
        })
    }
}

/// Strictly increasing within the process, even when the clock stalls or
/// steps backwards. Fixed width keeps lexicographic order equal to numeric.
pub fn monotonic_token() -> String {
    let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let mut last = LAST_MONOTONIC.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_MONOTONIC.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return format!("{:016x}", next),
            Err(actual) => last = actual,
        }
    }
}

pub fn random_token() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub fn alpha_token() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(10)
        .map(|b| (b'a' + b % 26) as char)
        .collect()
}
