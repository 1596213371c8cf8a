/// Core types shared across tmplevel: the error taxonomy, codecs and the
/// option structs accepted by factories and harnesses.
use crate::engine::BackendRef;
use crate::wrap::WrapInput;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type used throughout tmplevel
pub type Result<T> = std::result::Result<T, LevelError>;

/// Error taxonomy for creation, composition and lifecycle
#[derive(Error, Debug)]
pub enum LevelError {
    #[error("Expected object, string or array for \"wrap\", got: {kind}")]
    InvalidWrapperSpec { kind: String },

    #[error("Wrapper name is empty")]
    EmptyWrapperName,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}", helpful(.message, .hints))]
    ResourceUnavailable {
        name: String,
        message: String,
        hints: Vec<String>,
    },

    #[error("Wrapper error: {0}")]
    Wrapper(String),

    #[error("Failed to open {location}: {reason}")]
    Open { location: String, reason: String },

    #[error("Failed to close {location}: {reason}")]
    Close { location: String, reason: String },

    #[error("Failed to delete {location}: {reason}")]
    Delete { location: String, reason: String },

    #[error("Store is not open: {0}")]
    NotOpen(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LevelError {
    /// Configuration errors are raised before any resource exists
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LevelError::InvalidWrapperSpec { .. } | LevelError::EmptyWrapperName | LevelError::Config(_)
        )
    }

    pub(crate) fn unavailable(what: &str, name: &str, hints: Vec<String>) -> Self {
        LevelError::ResourceUnavailable {
            name: name.to_string(),
            message: format!("Cannot find {} '{}'.", what, name),
            hints,
        }
    }
}

/// Append remediation hints to a message, one `-- hint` line each.
pub fn helpful(message: &str, hints: &[String]) -> String {
    let mut out = message.to_string();
    if hints.is_empty() {
        return out;
    }
    out.push('\n');
    for hint in hints {
        out.push_str("\n    -- ");
        out.push_str(hint);
    }
    out.push('\n');
    out
}

/// Key and value codecs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Utf8,
    Json,
    Binary,
}

impl Codec {
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match self {
            Codec::Utf8 => Ok(match value {
                Value::String(s) => s.as_bytes().to_vec(),
                other => other.to_string().into_bytes(),
            }),
            Codec::Json => serde_json::to_vec(value).map_err(|e| LevelError::Codec(e.to_string())),
            Codec::Binary => match value {
                Value::String(s) => hex::decode(s)
                    .map_err(|e| LevelError::Codec(format!("Invalid hex payload: {}", e))),
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .filter(|b| *b <= u8::MAX as u64)
                            .map(|b| b as u8)
                            .ok_or_else(|| LevelError::Codec(format!("Not a byte: {}", item)))
                    })
                    .collect(),
                other => Err(LevelError::Codec(format!(
                    "Binary codec expects hex text or a byte array, got: {}",
                    other
                ))),
            },
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        match self {
            Codec::Utf8 => String::from_utf8(bytes.to_vec())
                .map(Value::String)
                .map_err(|e| LevelError::Codec(e.to_string())),
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| LevelError::Codec(e.to_string())),
            Codec::Binary => Ok(Value::String(hex::encode(bytes))),
        }
    }
}

impl FromStr for Codec {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Codec::Utf8),
            "json" => Ok(Codec::Json),
            "binary" | "hex" => Ok(Codec::Binary),
            other => Err(LevelError::Config(format!("Unknown encoding: {}", other))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::Utf8 => "utf8",
            Codec::Json => "json",
            Codec::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// Store settings handed through to the engine, plus encodings.
/// These can be set per factory and overridden per created store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreSettings {
    pub encoding: Option<String>,
    pub key_encoding: Option<String>,
    pub value_encoding: Option<String>,
    /// Engine passthrough options (e.g. `createIfMissing`)
    pub engine: Map<String, Value>,
}

impl StoreSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern methods for optional fields
    pub fn encoding(mut self, codec: &str) -> Self {
        self.encoding = Some(codec.to_string());
        self
    }

    pub fn key_encoding(mut self, codec: &str) -> Self {
        self.key_encoding = Some(codec.to_string());
        self
    }

    pub fn value_encoding(mut self, codec: &str) -> Self {
        self.value_encoding = Some(codec.to_string());
        self
    }

    pub fn engine_option(mut self, key: &str, value: Value) -> Self {
        self.engine.insert(key.to_string(), value);
        self
    }

    /// Overlay `overrides` on top of these settings; set fields win.
    pub fn merged(&self, overrides: Option<&StoreSettings>) -> StoreSettings {
        let mut merged = self.clone();
        if let Some(o) = overrides {
            if o.encoding.is_some() {
                merged.encoding = o.encoding.clone();
            }
            if o.key_encoding.is_some() {
                merged.key_encoding = o.key_encoding.clone();
            }
            if o.value_encoding.is_some() {
                merged.value_encoding = o.value_encoding.clone();
            }
            for (k, v) in &o.engine {
                merged.engine.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// Options accepted by a factory
#[derive(Clone, Default)]
pub struct LevelOptions {
    /// Use the in-memory engine
    pub mem: bool,
    /// Explicit backend; authoritative over `mem`
    pub db: Option<BackendRef>,
    /// Delete each store after it closes
    pub clean: bool,
    /// Remove the generator root at process exit even if not empty
    pub always: bool,
    /// Name generator tag (`monotonic`, `random`, `alpha`)
    pub gen: Option<String>,
    /// Wrapper chain in any accepted shape
    pub wrap: Option<WrapInput>,
    pub store: StoreSettings,
}

impl LevelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mem(mut self, mem: bool) -> Self {
        self.mem = mem;
        self
    }

    pub fn db(mut self, backend: impl Into<BackendRef>) -> Self {
        self.db = Some(backend.into());
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    pub fn gen(mut self, tag: &str) -> Self {
        self.gen = Some(tag.to_string());
        self
    }

    pub fn wrap(mut self, wrap: impl Into<WrapInput>) -> Self {
        self.wrap = Some(wrap.into());
        self
    }

    pub fn encoding(mut self, codec: &str) -> Self {
        self.store = self.store.encoding(codec);
        self
    }

    pub fn key_encoding(mut self, codec: &str) -> Self {
        self.store = self.store.key_encoding(codec);
        self
    }

    pub fn value_encoding(mut self, codec: &str) -> Self {
        self.store = self.store.value_encoding(codec);
        self
    }

    pub fn engine_option(mut self, key: &str, value: Value) -> Self {
        self.store = self.store.engine_option(key, value);
        self
    }
}

impl fmt::Debug for LevelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelOptions")
            .field("mem", &self.mem)
            .field("db", &self.db.as_ref().map(|b| b.label()))
            .field("clean", &self.clean)
            .field("always", &self.always)
            .field("gen", &self.gen)
            .field("wrap", &self.wrap.is_some())
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_helpful_formats_hints() {
        let msg = helpful("Cannot find wrapper 'beep'.", &["Please try `x`".to_string()]);
        assert_eq!(msg, "Cannot find wrapper 'beep'.\n\n    -- Please try `x`\n");
        assert_eq!(helpful("plain", &[]), "plain");
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("utf-8".parse::<Codec>().unwrap(), Codec::Utf8);
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert!("yaml".parse::<Codec>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_json_codec() {
        let bytes = Codec::Json.encode(&json!({ "a": 1 })).unwrap();
        assert_eq!(Codec::Json.decode(&bytes).unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn test_utf8_codec_stringifies_non_strings() {
        assert_eq!(Codec::Utf8.encode(&json!("abc")).unwrap(), b"abc");
        assert_eq!(Codec::Utf8.encode(&json!(12)).unwrap(), b"12");
    }

    #[test]
    fn test_binary_codec() {
        assert_eq!(Codec::Binary.encode(&json!([1, 2, 255])).unwrap(), vec![1, 2, 255]);
        assert_eq!(Codec::Binary.encode(&json!("0aff")).unwrap(), vec![10, 255]);
        assert_eq!(Codec::Binary.decode(&[10, 255]).unwrap(), json!("0aff"));
        assert!(Codec::Binary.encode(&json!([256])).is_err());
    }

    #[test]
    fn test_settings_merge() {
        let base = StoreSettings::new()
            .encoding("json")
            .engine_option("createIfMissing", json!(true));
        let merged = base.merged(Some(&StoreSettings::new().value_encoding("utf8")));
        assert_eq!(merged.encoding.as_deref(), Some("json"));
        assert_eq!(merged.value_encoding.as_deref(), Some("utf8"));
        assert_eq!(merged.engine.get("createIfMissing"), Some(&json!(true)));
        assert_eq!(base.merged(None), base);
    }
}
