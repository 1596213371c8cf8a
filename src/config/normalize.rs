/// Option normalization
///
/// Turns caller-facing [`LevelOptions`] into the settled configuration a
/// factory runs with: which engine, which location mode, which generator,
/// the canonical wrapper chain and the effective encodings. Every error here
/// is raised before any resource exists.
use crate::config::types::{Codec, LevelOptions, Result, StoreSettings};
use crate::engine::{default_disk_engine, is_memory_engine, Engine, MemoryEngine};
use crate::location::generator::{GeneratorTag, GENERATOR_ENV};
use crate::location::Mode;
use crate::wrap::{normalize_chain, WrapEntry};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Effective key and value codecs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Encodings {
    pub key: Codec,
    pub value: Codec,
}

impl Encodings {
    /// `encoding` fills in whichever of key/value encoding is not set
    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        let settings = backfill_encodings(settings);
        let parse = |codec: &Option<String>| -> Result<Codec> {
            match codec {
                Some(name) => name.parse(),
                None => Ok(Codec::default()),
            }
        };
        Ok(Self {
            key: parse(&settings.key_encoding)?,
            value: parse(&settings.value_encoding)?,
        })
    }
}

/// Copy the generic `encoding` into unset key/value encodings
pub fn backfill_encodings(settings: &StoreSettings) -> StoreSettings {
    let mut out = settings.clone();
    if let Some(encoding) = &settings.encoding {
        if out.key_encoding.is_none() {
            out.key_encoding = Some(encoding.clone());
        }
        if out.value_encoding.is_none() {
            out.value_encoding = Some(encoding.clone());
        }
    }
    out
}

/// Settled factory configuration
#[derive(Clone)]
pub struct Normalized {
    pub mode: Mode,
    pub engine: Arc<dyn Engine>,
    pub clean: bool,
    pub always: bool,
    pub generator: GeneratorTag,
    pub chain: Vec<WrapEntry>,
    /// Encodings and engine passthrough options, encodings backfilled
    pub store: StoreSettings,
}

impl Normalized {
    pub fn is_memory(&self) -> bool {
        self.mode == Mode::Memory
    }
}

impl fmt::Debug for Normalized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalized")
            .field("mode", &self.mode)
            .field("engine", &self.engine.name())
            .field("clean", &self.clean)
            .field("always", &self.always)
            .field("generator", &self.generator)
            .field("chain", &self.chain.len())
            .field("store", &self.store)
            .finish()
    }
}

fn generator_tag(explicit: Option<&str>) -> Result<GeneratorTag> {
    if let Some(tag) = explicit {
        return tag.parse();
    }
    match std::env::var(GENERATOR_ENV) {
        Ok(tag) if !tag.trim().is_empty() => tag.trim().parse(),
        _ => Ok(GeneratorTag::default()),
    }
}

/// Select the engine. An explicit backend wins over `mem`; an explicit
/// in-memory backend implies memory mode.
fn select_backend(options: &LevelOptions) -> Result<(Mode, Arc<dyn Engine>)> {
    match &options.db {
        Some(backend) => {
            let engine = backend.resolve()?;
            let mode = if is_memory_engine(&engine) || engine.is_memory() {
                Mode::Memory
            } else {
                Mode::Disk
            };
            Ok((mode, engine))
        }
        None if options.mem => Ok((Mode::Memory, MemoryEngine::shared())),
        None => Ok((Mode::Disk, default_disk_engine())),
    }
}

pub fn normalize(options: &LevelOptions) -> Result<Normalized> {
    let chain = normalize_chain(options.wrap.as_ref())?;
    let generator = generator_tag(options.gen.as_deref())?;
    let store = backfill_encodings(&options.store);
    // reject unknown codecs up front
    Encodings::from_settings(&store)?;
    let (mode, engine) = select_backend(options)?;

    let normalized = Normalized {
        mode,
        engine,
        clean: options.clean,
        always: options.always,
        generator,
        chain,
        store,
    };
    debug!("Normalized options: {:?}", normalized);
    Ok(normalized)
}
