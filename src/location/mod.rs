//! Location generation
//!
//! Resolves name templates into unique store locations: directories under the
//! system temp dir for disk stores, logical names for in-memory stores.

pub mod generator;

pub use generator::GeneratorTag;

use crate::config::types::{LevelError, Result};
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Wildcard substituted by a generated token
pub const WILDCARD: char = '*';

/// Template used for disk stores when none is given
pub const DEFAULT_DISK_TEMPLATE: &str = "test-level/*";

/// Attempts at claiming a fresh directory before giving up
const MAX_CLAIM_ATTEMPTS: usize = 16;

/// Storage mode a location is resolved for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Memory,
    Disk,
}

/// Name template plus mode and generator
#[derive(Clone, Debug)]
pub struct LocationSpec {
    template: Option<String>,
    mode: Mode,
    generator: GeneratorTag,
    base_dir: PathBuf,
}

impl LocationSpec {
    pub fn new(template: Option<&str>, mode: Mode, generator: GeneratorTag) -> Self {
        Self {
            template: template.filter(|t| !t.is_empty()).map(str::to_string),
            mode,
            generator,
            base_dir: std::env::temp_dir(),
        }
    }

    /// Resolve disk locations under `dir` instead of the system temp dir
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generator(&self) -> GeneratorTag {
        self.generator
    }

    fn disk_template(&self) -> &str {
        self.template.as_deref().unwrap_or(DEFAULT_DISK_TEMPLATE)
    }

    /// Directory holding generated locations, when it is not the base dir
    /// itself. This is what gets removed at process exit.
    pub fn root(&self) -> Option<PathBuf> {
        if self.mode != Mode::Disk {
            return None;
        }
        let template = self.disk_template();
        let (head, _) = template.split_once(WILDCARD)?;
        let head = head.trim_end_matches(|c: char| c != '/' && c != std::path::MAIN_SEPARATOR);
        let head = head.trim_end_matches(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR);
        if head.is_empty() {
            None
        } else {
            Some(self.base_dir.join(head))
        }
    }

    /// Resolve a fresh location, optionally scoped to a sub-name.
    /// Disk mode claims the directory on the filesystem.
    pub fn resolve(&self, sub: Option<&str>) -> Result<String> {
        match self.mode {
            Mode::Memory => Ok(self.resolve_memory(sub)),
            Mode::Disk => self.resolve_disk(sub),
        }
    }

    fn resolve_memory(&self, sub: Option<&str>) -> String {
        let prefix = self.template.as_deref().map(memory_prefix);
        let token = self.generator.token();
        join_name(&[prefix.as_deref(), sub, Some(token.as_str())])
    }

    fn resolve_disk(&self, sub: Option<&str>) -> Result<String> {
        let template = self.disk_template();

        let base = if template.contains(WILDCARD) {
            self.claim(template)?
        } else {
            let path = self.base_dir.join(template);
            fs::create_dir_all(&path).map_err(|e| create_error(&path, e))?;
            path
        };

        let location = match sub.filter(|s| !s.is_empty()) {
            Some(sub) => {
                let path = base.join(sub);
                fs::create_dir_all(&path).map_err(|e| create_error(&path, e))?;
                path
            }
            None => base,
        };

        debug!("Resolved disk location: {}", location.display());
        Ok(location.to_string_lossy().into_owned())
    }

    fn claim(&self, template: &str) -> Result<PathBuf> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let token = self.generator.token();
            let path = self.base_dir.join(expand(template, &token));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| create_error(parent, e))?;
            }
            match fs::create_dir(&path) {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Location already taken, drawing a new token: {}", path.display());
                }
                Err(e) => return Err(create_error(&path, e)),
            }
        }
        Err(LevelError::Config(format!(
            "Could not claim a unique location for template '{}' after {} attempts",
            template, MAX_CLAIM_ATTEMPTS
        )))
    }
}

/// Replace the first wildcard in `template` with `token`
pub fn expand(template: &str, token: &str) -> String {
    template.replacen(WILDCARD, token, 1)
}

/// Join the non-empty parts with `-`
pub fn join_name(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-")
}

fn memory_prefix(template: &str) -> String {
    template
        .replacen(WILDCARD, "", 1)
        .trim_matches(|c: char| c == '-' || c == '/' || c == '_')
        .to_string()
}

fn create_error(path: &Path, e: std::io::Error) -> LevelError {
    LevelError::Io(std::io::Error::new(
        e.kind(),
        format!("Failed to create location {}: {}", path.display(), e),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::remove::remove_tree_secure;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tmplevel_location_{}_{}", name, std::process::id()))
    }

    #[test]
    fn test_join_name_skips_empty() {
        assert_eq!(join_name(&[Some("db"), None, Some("abc")]), "db-abc");
        assert_eq!(join_name(&[None, Some(""), Some("abc")]), "abc");
        assert_eq!(join_name(&[Some("a"), Some("b"), Some("c")]), "a-b-c");
    }

    #[test]
    fn test_expand_first_wildcard_only() {
        assert_eq!(expand("db_*", "x"), "db_x");
        assert_eq!(expand("a/*/*", "x"), "a/x/*");
        assert_eq!(expand("literal", "x"), "literal");
    }

    #[test]
    fn test_memory_locations_never_touch_disk() {
        let spec = LocationSpec::new(Some("test-level-*"), Mode::Memory, GeneratorTag::Random);
        let a = spec.resolve(None).unwrap();
        let b = spec.resolve(Some("sub")).unwrap();
        assert!(a.starts_with("test-level-"));
        assert!(b.starts_with("test-level-sub-"));
        assert_ne!(a, b);
        assert!(!Path::new(&a).exists());

        let bare = LocationSpec::new(None, Mode::Memory, GeneratorTag::Alpha);
        assert_eq!(bare.resolve(None).unwrap().len(), 10);
    }

    #[test]
    fn test_disk_locations_are_claimed_and_unique() {
        let dir = scratch("unique");
        let spec = LocationSpec::new(None, Mode::Disk, GeneratorTag::Monotonic).in_dir(&dir);

        let a = spec.resolve(None).unwrap();
        let b = spec.resolve(None).unwrap();
        assert_ne!(a, b);
        assert!(Path::new(&a).is_dir());
        assert!(a.contains("test-level"));
        assert_eq!(spec.root(), Some(dir.join("test-level")));

        remove_tree_secure(&dir).unwrap();
    }

    #[test]
    fn test_disk_sub_name_and_literal_template() {
        let dir = scratch("literal");
        let spec = LocationSpec::new(Some("fixed"), Mode::Disk, GeneratorTag::Monotonic).in_dir(&dir);

        let loc = spec.resolve(Some("special-name")).unwrap();
        assert_eq!(PathBuf::from(&loc), dir.join("fixed").join("special-name"));
        assert!(Path::new(&loc).is_dir());
        assert_eq!(spec.root(), None);

        remove_tree_secure(&dir).unwrap();
    }

    #[test]
    fn test_root_of_flat_template_is_none() {
        let spec = LocationSpec::new(Some("beep-*"), Mode::Disk, GeneratorTag::Monotonic);
        assert_eq!(spec.root(), None);

        let nested = LocationSpec::new(Some("my-module/db-*"), Mode::Disk, GeneratorTag::Monotonic)
            .in_dir("/base");
        assert_eq!(nested.root(), Some(PathBuf::from("/base/my-module")));
    }
}
