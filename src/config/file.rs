use crate::config::types::{LevelError, LevelOptions, Result, StoreSettings};
use crate::wrap::WrapInput;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Factory configuration as loaded from JSON.
///
/// Known keys map onto [`LevelOptions`]; every other key is handed to the
/// engine untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactoryConfig {
    /// Name template, e.g. `"fixtures/*"`
    pub name: Option<String>,
    pub mem: bool,
    /// Backend name (`memory`, `disk` or a registered name)
    pub db: Option<String>,
    pub clean: bool,
    pub always: bool,
    pub gen: Option<String>,
    pub wrap: Option<Value>,
    pub encoding: Option<String>,
    pub key_encoding: Option<String>,
    pub value_encoding: Option<String>,
    /// Harness only: wait for the store to open before running a test
    pub wait: Option<bool>,
    #[serde(flatten)]
    pub engine: Map<String, Value>,
}

impl FactoryConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| LevelError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LevelError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json_str(&content)
    }

    pub fn to_options(&self) -> LevelOptions {
        let mut options = LevelOptions {
            mem: self.mem,
            db: self.db.clone().map(Into::into),
            clean: self.clean,
            always: self.always,
            gen: self.gen.clone(),
            wrap: self.wrap.clone().map(WrapInput::Raw),
            store: StoreSettings {
                encoding: self.encoding.clone(),
                key_encoding: self.key_encoding.clone(),
                value_encoding: self.value_encoding.clone(),
                engine: Map::new(),
            },
        };
        for (key, value) in &self.engine {
            options.store.engine.insert(key.clone(), value.clone());
        }
        options
    }
}
