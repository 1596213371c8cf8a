/// Named sub-databases sharing one store
///
/// Each sublevel owns the keys under `!<name>!`. Nested sublevels stack
/// their prefixes. The wrapper option `valueEncoding` sets the codec used
/// for values written through the sublevels.
use crate::config::types::{Codec, LevelError, Result};
use crate::handle::{Db, Handle, Surface};
use crate::wrap::Decorator;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

const SEPARATOR: char = '!';

pub(crate) fn decorator() -> Decorator {
    Decorator::new("sublevel", |handle, options| {
        let value = match options.and_then(|o| o.get("valueEncoding")).and_then(Value::as_str) {
            Some(codec) => codec.parse::<Codec>()?,
            None => handle.db().encodings().value,
        };
        Ok(Arc::new(Sublevels { handle, value }) as Arc<dyn Surface>)
    })
}

/// Surface produced by the `sublevel` wrapper
pub struct Sublevels {
    handle: Handle,
    value: Codec,
}

impl Sublevels {
    pub fn sublevel(&self, name: &str) -> Result<Sublevel> {
        Sublevel::new(self.handle.db().clone(), String::new(), name, self.value)
    }

    pub fn value_encoding(&self) -> Codec {
        self.value
    }

    /// The handle this surface was built on
    pub fn inner(&self) -> &Handle {
        &self.handle
    }
}

impl Surface for Sublevels {
    fn location(&self) -> Option<String> {
        Some(self.handle.location().to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A key-prefixed view of the base store
#[derive(Clone)]
pub struct Sublevel {
    db: Db,
    prefix: String,
    value: Codec,
}

impl Sublevel {
    fn new(db: Db, parent: String, name: &str, value: Codec) -> Result<Self> {
        if name.is_empty() || name.contains(SEPARATOR) {
            return Err(LevelError::Wrapper(format!("Invalid sublevel name: {:?}", name)));
        }
        Ok(Self {
            db,
            prefix: format!("{}{}{}{}", parent, SEPARATOR, name, SEPARATOR),
            value,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sublevel(&self, name: &str) -> Result<Sublevel> {
        Sublevel::new(self.db.clone(), self.prefix.clone(), name, self.value)
    }

    fn key(&self, key: &str) -> Vec<u8> {
        format!("{}{}", self.prefix, key).into_bytes()
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.db.put_raw(&self.key(key), &self.value.encode(value)?)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.db.get_raw(&self.key(key))? {
            Some(bytes) => Ok(Some(self.value.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn del(&self, key: &str) -> Result<()> {
        self.db.del_raw(&self.key(key))
    }

    /// Keys directly in this sublevel, prefix stripped. Entries of nested
    /// sublevels are not included.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for raw in self.db.keys_raw(self.prefix.as_bytes())? {
            let key = String::from_utf8_lossy(&raw[self.prefix.len()..]).into_owned();
            if !key.starts_with(SEPARATOR) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize::Encodings;
    use crate::engine::{Engine, MemoryEngine};
    use crate::lifecycle::{HookRegistry, ManagedClose};
    use crate::wrap::{compose, ResolvedWrapper};
    use serde_json::{json, Map};

    fn sublevels(options: Option<Value>) -> Handle {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        let managed = ManagedClose::new("sub", false, Arc::new(HookRegistry::new()), None);
        let db = Db::new("sub", engine, Map::new(), Encodings::default(), managed);
        db.open().unwrap();
        compose(
            db,
            &[ResolvedWrapper {
                decorator: decorator(),
                options,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_sublevel_prefixes_keys() {
        let handle = sublevels(None);
        let subs = handle.surface::<Sublevels>().unwrap();
        let books = subs.sublevel("books").unwrap();
        books.put("a", &json!("x")).unwrap();

        assert_eq!(books.get("a").unwrap(), Some(json!("x")));
        assert_eq!(handle.db().get("!books!a").unwrap(), Some(json!("x")));
        assert_eq!(handle.get("a").unwrap(), None);
    }

    #[test]
    fn test_value_encoding_option() {
        let handle = sublevels(Some(json!({ "valueEncoding": "json" })));
        let subs = handle.surface::<Sublevels>().unwrap();
        assert_eq!(subs.value_encoding(), Codec::Json);

        let docs = subs.sublevel("docs").unwrap();
        docs.put("one", &json!({ "n": 1 })).unwrap();
        assert_eq!(docs.get("one").unwrap(), Some(json!({ "n": 1 })));
    }

    #[test]
    fn test_nested_sublevels_are_isolated() {
        let handle = sublevels(None);
        let subs = handle.surface::<Sublevels>().unwrap();
        let outer = subs.sublevel("a").unwrap();
        let inner = outer.sublevel("b").unwrap();
        outer.put("k", &json!("outer")).unwrap();
        inner.put("k", &json!("inner")).unwrap();

        assert_eq!(inner.prefix(), "!a!!b!");
        assert_eq!(outer.keys().unwrap(), vec!["k".to_string()]);
        assert_eq!(inner.get("k").unwrap(), Some(json!("inner")));
    }

    #[test]
    fn test_invalid_names() {
        let handle = sublevels(None);
        let subs = handle.surface::<Sublevels>().unwrap();
        assert!(subs.sublevel("").is_err());
        assert!(subs.sublevel("a!b").is_err());
    }

    #[test]
    fn test_unknown_value_encoding_fails() {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        let managed = ManagedClose::new("sub-bad", false, Arc::new(HookRegistry::new()), None);
        let db = Db::new("sub-bad", engine, Map::new(), Encodings::default(), managed);
        let err = decorator()
            .apply(Handle::from_db(db), Some(&json!({ "valueEncoding": "yaml" })))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
