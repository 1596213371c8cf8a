/// Named wrapper lookup
///
/// Symbolic wrapper names resolve through a process-wide table. The prefixed
/// name (`level-<name>`) takes precedence over the bare one.
use crate::config::types::{LevelError, Result};
use crate::wrap::{bytespace, sublevel, Decorator};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

pub const WRAPPER_PREFIX: &str = "level-";

static WRAPPERS: OnceLock<Mutex<HashMap<String, Decorator>>> = OnceLock::new();

fn wrappers() -> &'static Mutex<HashMap<String, Decorator>> {
    WRAPPERS.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert("level-sublevel".to_string(), sublevel::decorator());
        map.insert("bytespace".to_string(), bytespace::decorator());
        Mutex::new(map)
    })
}

/// Make a decorator resolvable by name
pub fn register_wrapper(name: &str, decorator: Decorator) {
    if let Ok(mut map) = wrappers().lock() {
        map.insert(name.to_string(), decorator);
    }
}

fn candidates(id: &str) -> Vec<String> {
    if id.starts_with(WRAPPER_PREFIX) {
        vec![id.to_string()]
    } else {
        vec![format!("{}{}", WRAPPER_PREFIX, id), id.to_string()]
    }
}

/// Resolve a wrapper by name. Missing names fail with a remediation hint.
pub fn resolve_wrapper(id: &str) -> Result<Decorator> {
    if id.is_empty() {
        return Err(LevelError::EmptyWrapperName);
    }
    let map = wrappers()
        .lock()
        .map_err(|_| LevelError::Config("wrapper registry lock poisoned".into()))?;
    for name in candidates(id) {
        if let Some(decorator) = map.get(&name) {
            return Ok(decorator.clone());
        }
    }
    Err(LevelError::unavailable(
        "wrapper",
        id,
        vec![format!(
            "Please try `tmplevel::wrap::register_wrapper(\"{}{}\", decorator)`",
            WRAPPER_PREFIX, id
        )],
    ))
}
