//! Wrapper chains
//!
//! A wrapper chain is an ordered list of `(decorator, options)` pairs applied
//! to the base store. Chains are accepted in several shapes (a mapping of
//! name to options, a single name, or a list of entries) and normalized into
//! one canonical list before anything is created.

pub mod bytespace;
pub mod registry;
pub mod sublevel;

pub use bytespace::Bytespace;
pub use registry::{register_wrapper, resolve_wrapper, WRAPPER_PREFIX};
pub use sublevel::{Sublevel, Sublevels};

use crate::config::types::{LevelError, Result};
use crate::handle::{Db, Handle, Surface};
use log::debug;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub type DecoratorFn = dyn Fn(Handle, Option<&Value>) -> Result<Arc<dyn Surface>> + Send + Sync;

/// A decorator: takes the current handle and its options, returns a new
/// surface
#[derive(Clone)]
pub struct Decorator {
    name: String,
    func: Arc<DecoratorFn>,
}

impl Decorator {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Handle, Option<&Value>) -> Result<Arc<dyn Surface>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, handle: Handle, options: Option<&Value>) -> Result<Arc<dyn Surface>> {
        (self.func)(handle, options)
    }

    fn same(&self, other: &Decorator) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const u8,
            Arc::as_ptr(&other.func) as *const u8,
        )
    }
}

impl fmt::Debug for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decorator({})", self.name)
    }
}

/// A decorator given directly or by symbolic name
#[derive(Clone, Debug)]
pub enum WrapperRef {
    Named(String),
    Func(Decorator),
}

impl WrapperRef {
    pub fn label(&self) -> &str {
        match self {
            WrapperRef::Named(name) => name,
            WrapperRef::Func(decorator) => decorator.name(),
        }
    }

    pub fn resolve(&self) -> Result<Decorator> {
        match self {
            WrapperRef::Named(name) => resolve_wrapper(name),
            WrapperRef::Func(decorator) => Ok(decorator.clone()),
        }
    }
}

impl PartialEq for WrapperRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WrapperRef::Named(a), WrapperRef::Named(b)) => a == b,
            (WrapperRef::Func(a), WrapperRef::Func(b)) => a.same(b),
            _ => false,
        }
    }
}

impl From<&str> for WrapperRef {
    fn from(name: &str) -> Self {
        WrapperRef::Named(name.to_string())
    }
}

impl From<Decorator> for WrapperRef {
    fn from(decorator: Decorator) -> Self {
        WrapperRef::Func(decorator)
    }
}

/// One entry of a list-shaped chain
#[derive(Clone, Debug)]
pub enum WrapItem {
    Bare(WrapperRef),
    Pair(WrapperRef, Option<Value>),
}

impl WrapItem {
    pub fn bare(wrapper: impl Into<WrapperRef>) -> Self {
        WrapItem::Bare(wrapper.into())
    }

    pub fn pair(wrapper: impl Into<WrapperRef>, options: Value) -> Self {
        WrapItem::Pair(wrapper.into(), Some(options))
    }
}

/// Wrapper chain as supplied by the caller
#[derive(Clone, Debug)]
pub enum WrapInput {
    /// Name to options, applied in mapping order
    Map(Map<String, Value>),
    /// A single wrapper name
    Name(String),
    /// Ordered entries
    List(Vec<WrapItem>),
    /// Untyped input, e.g. from a configuration file
    Raw(Value),
}

impl From<&str> for WrapInput {
    fn from(name: &str) -> Self {
        WrapInput::Name(name.to_string())
    }
}

impl From<Map<String, Value>> for WrapInput {
    fn from(map: Map<String, Value>) -> Self {
        WrapInput::Map(map)
    }
}

impl From<Vec<WrapItem>> for WrapInput {
    fn from(items: Vec<WrapItem>) -> Self {
        WrapInput::List(items)
    }
}

impl From<Value> for WrapInput {
    fn from(value: Value) -> Self {
        WrapInput::Raw(value)
    }
}

/// Canonical chain entry
#[derive(Clone, Debug, PartialEq)]
pub struct WrapEntry {
    pub wrapper: WrapperRef,
    pub options: Option<Value>,
}

impl WrapEntry {
    fn new(wrapper: WrapperRef, options: Option<Value>) -> Result<Self> {
        if let WrapperRef::Named(name) = &wrapper {
            if name.is_empty() {
                return Err(LevelError::EmptyWrapperName);
            }
        }
        Ok(Self {
            wrapper,
            // null means "no options"
            options: options.filter(|o| !o.is_null()),
        })
    }
}

/// A chain entry with its decorator looked up
#[derive(Clone, Debug)]
pub struct ResolvedWrapper {
    pub decorator: Decorator,
    pub options: Option<Value>,
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(kind: &str) -> LevelError {
    LevelError::InvalidWrapperSpec { kind: kind.to_string() }
}

fn from_map(map: &Map<String, Value>) -> Result<Vec<WrapEntry>> {
    map.iter()
        .map(|(name, options)| WrapEntry::new(WrapperRef::Named(name.clone()), Some(options.clone())))
        .collect()
}

fn item_from_value(value: &Value) -> Result<WrapEntry> {
    match value {
        Value::String(name) => WrapEntry::new(WrapperRef::Named(name.clone()), None),
        Value::Array(pair) => match pair.as_slice() {
            [Value::String(name)] => WrapEntry::new(WrapperRef::Named(name.clone()), None),
            [Value::String(name), options] => {
                WrapEntry::new(WrapperRef::Named(name.clone()), Some(options.clone()))
            }
            _ => Err(invalid("array")),
        },
        other => Err(invalid(kind_of(other))),
    }
}

/// Normalize any accepted chain shape into canonical ordered entries.
/// Fails without side effects on an unsupported shape or an empty name.
pub fn normalize_chain(input: Option<&WrapInput>) -> Result<Vec<WrapEntry>> {
    let input = match input {
        Some(input) => input,
        None => return Ok(Vec::new()),
    };

    match input {
        WrapInput::Map(map) => from_map(map),
        WrapInput::Name(name) => Ok(vec![WrapEntry::new(WrapperRef::Named(name.clone()), None)?]),
        WrapInput::List(items) => items
            .iter()
            .map(|item| match item {
                WrapItem::Bare(wrapper) => WrapEntry::new(wrapper.clone(), None),
                WrapItem::Pair(wrapper, options) => WrapEntry::new(wrapper.clone(), options.clone()),
            })
            .collect(),
        WrapInput::Raw(value) => match value {
            Value::Object(map) => from_map(map),
            Value::String(name) => Ok(vec![WrapEntry::new(WrapperRef::Named(name.clone()), None)?]),
            Value::Array(items) => items.iter().map(item_from_value).collect(),
            other => Err(invalid(kind_of(other))),
        },
    }
}

/// Look up every decorator of a normalized chain
pub fn resolve_chain(chain: &[WrapEntry]) -> Result<Vec<ResolvedWrapper>> {
    chain
        .iter()
        .map(|entry| {
            Ok(ResolvedWrapper {
                decorator: entry.wrapper.resolve()?,
                options: entry.options.clone(),
            })
        })
        .collect()
}

/// Apply `chain` to `db` in order. After each step a surface without a
/// close gets the base managed close and one without a location gets the
/// base location. Decorator errors stop composition and propagate as is.
pub fn compose(db: Db, chain: &[ResolvedWrapper]) -> Result<Handle> {
    let base_close = db.close_fn();
    let base_location = db.location().to_string();
    let mut handle = Handle::from_db(db.clone());

    for step in chain {
        debug!("Applying wrapper {} to {}", step.decorator.name(), base_location);
        let surface = step.decorator.apply(handle, step.options.as_ref())?;
        let closer = surface.closer().unwrap_or_else(|| base_close.clone());
        let location = surface
            .location()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| base_location.clone());
        handle = Handle::layered(surface, location, closer, db.clone());
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize::Encodings;
    use crate::engine::{Engine, MemoryEngine};
    use crate::lifecycle::{HookRegistry, ManagedClose};
    use serde_json::json;
    use std::any::Any;
    use std::sync::Mutex;

    fn labels(chain: &[WrapEntry]) -> Vec<(String, Option<Value>)> {
        chain
            .iter()
            .map(|e| (e.wrapper.label().to_string(), e.options.clone()))
            .collect()
    }

    #[test]
    fn test_equivalent_shapes_normalize_identically() {
        let list = WrapInput::List(vec![
            WrapItem::pair("wrapperA", json!({ "opt": 1 })),
            WrapItem::bare("wrapperB"),
        ]);
        let raw_list = WrapInput::Raw(json!([["wrapperA", { "opt": 1 }], "wrapperB"]));
        let map = WrapInput::Raw(json!({ "wrapperA": { "opt": 1 }, "wrapperB": null }));

        let expected = vec![
            ("wrapperA".to_string(), Some(json!({ "opt": 1 }))),
            ("wrapperB".to_string(), None),
        ];
        assert_eq!(labels(&normalize_chain(Some(&list)).unwrap()), expected);
        assert_eq!(labels(&normalize_chain(Some(&raw_list)).unwrap()), expected);
        assert_eq!(labels(&normalize_chain(Some(&map)).unwrap()), expected);
    }

    #[test]
    fn test_single_name_is_one_element_chain() {
        let chain = normalize_chain(Some(&WrapInput::from("sublevel"))).unwrap();
        assert_eq!(chain, vec![WrapEntry::new("sublevel".into(), None).unwrap()]);
        assert!(normalize_chain(None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_shapes_name_the_kind() {
        for (value, kind) in [(json!(5), "number"), (json!(true), "boolean"), (json!(null), "null")] {
            match normalize_chain(Some(&WrapInput::Raw(value))) {
                Err(LevelError::InvalidWrapperSpec { kind: k }) => assert_eq!(k, kind),
                other => panic!("unexpected: {:?}", other.map(|c| c.len())),
            }
        }
        let err = normalize_chain(Some(&WrapInput::Raw(json!([7])))).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            normalize_chain(Some(&WrapInput::from(""))),
            Err(LevelError::EmptyWrapperName)
        ));
        assert!(matches!(
            normalize_chain(Some(&WrapInput::Raw(json!([""])))),
            Err(LevelError::EmptyWrapperName)
        ));
    }

    struct Bare;

    impl Surface for Bare {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Renamed(String);

    impl Surface for Renamed {
        fn location(&self) -> Option<String> {
            Some(self.0.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn base(location: &str) -> Db {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
        let managed = ManagedClose::new(location, false, Arc::new(HookRegistry::new()), None);
        let db = Db::new(location, engine, Map::new(), Encodings::default(), managed);
        db.open().unwrap();
        db
    }

    fn step(decorator: Decorator, options: Option<Value>) -> ResolvedWrapper {
        ResolvedWrapper { decorator, options }
    }

    #[test]
    fn test_compose_backfills_close_and_location() {
        let db = base("compose-backfill");
        let chain = vec![
            step(Decorator::new("renamed", |_, _| Ok(Arc::new(Renamed("elsewhere".into())))), None),
            step(Decorator::new("bare", |_, _| Ok(Arc::new(Bare))), None),
        ];
        let handle = compose(db.clone(), &chain).unwrap();
        assert_eq!(handle.location(), "compose-backfill");
        assert!(handle.surface::<Bare>().is_some());

        handle.close().unwrap();
        assert!(db.is_closed());
    }

    #[test]
    fn test_compose_keeps_surface_location() {
        let db = base("compose-keep");
        let chain = vec![step(
            Decorator::new("renamed", |_, _| Ok(Arc::new(Renamed("elsewhere".into())))),
            None,
        )];
        let handle = compose(db, &chain).unwrap();
        assert_eq!(handle.location(), "elsewhere");
    }

    #[test]
    fn test_compose_order_and_options() {
        let db = base("compose-order");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str, seen: Arc<Mutex<Vec<(String, Option<Value>)>>>| {
            Decorator::new(name, move |handle, options| {
                seen.lock().unwrap().push((name.to_string(), options.cloned()));
                Ok(Arc::new(handle) as Arc<dyn Surface>)
            })
        };
        let chain = vec![
            step(record("a", seen.clone()), Some(json!({ "opt": 1 }))),
            step(record("b", seen.clone()), None),
        ];
        compose(db, &chain).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a".to_string(), Some(json!({ "opt": 1 }))), ("b".to_string(), None)]
        );
    }

    #[test]
    fn test_decorator_failure_propagates_unchanged() {
        let db = base("compose-fail");
        let chain = vec![step(
            Decorator::new("broken", |_, _| Err(LevelError::Wrapper("boom".into()))),
            None,
        )];
        match compose(db, &chain) {
            Err(LevelError::Wrapper(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other.map(|h| h.location().to_string())),
        }
    }

    #[test]
    fn test_direct_decorators_compare_by_identity() {
        let a = Decorator::new("same-name", |h, _| Ok(Arc::new(h) as Arc<dyn Surface>));
        let b = Decorator::new("same-name", |h, _| Ok(Arc::new(h) as Arc<dyn Surface>));
        assert_eq!(WrapperRef::from(a.clone()), WrapperRef::from(a.clone()));
        assert_ne!(WrapperRef::from(a), WrapperRef::from(b));
    }
}
