/// A single byte-prefixed namespace over the base store.
/// Options: a namespace string, or `{ "namespace": "<ns>" }`.
use crate::config::types::{LevelError, Result};
use crate::handle::{Db, Surface};
use crate::wrap::Decorator;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

pub(crate) fn decorator() -> Decorator {
    Decorator::new("bytespace", |handle, options| {
        let namespace = match options {
            Some(Value::String(ns)) => ns.clone(),
            Some(Value::Object(map)) => map
                .get("namespace")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| LevelError::Wrapper("bytespace requires a namespace".into()))?,
            Some(other) => {
                return Err(LevelError::Wrapper(format!("Invalid bytespace options: {}", other)));
            }
            None => return Err(LevelError::Wrapper("bytespace requires a namespace".into())),
        };
        Ok(Arc::new(Bytespace::new(handle.db().clone(), &namespace)) as Arc<dyn Surface>)
    })
}

/// Surface produced by the `bytespace` wrapper
pub struct Bytespace {
    db: Db,
    namespace: String,
    prefix: Vec<u8>,
}

impl Bytespace {
    fn new(db: Db, namespace: &str) -> Self {
        let mut prefix = namespace.as_bytes().to_vec();
        prefix.push(0);
        Self {
            db,
            namespace: namespace.to_string(),
            prefix,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_raw(&self.key(key), value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get_raw(&self.key(key))
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.db.del_raw(&self.key(key))
    }

    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .db
            .keys_raw(&self.prefix)?
            .into_iter()
            .map(|k| k[self.prefix.len()..].to_vec())
            .collect())
    }
}

impl Surface for Bytespace {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
