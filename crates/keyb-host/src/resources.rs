//! Directory-backed resource store.
//!
//! Resolves the engine's DOS-style resource names (`"gr.kl"`,
//! `"keyboard.sys"`, `"EGA.CPX"`) against a host directory, trying the
//! exact name first and a lower-cased variant second, since the files
//! ship with DOS-style upper-case names but are often extracted onto
//! case-sensitive filesystems in lower case.
//!
//! The bundled tier stands in for the blobs a full emulator compiles
//! in: the embedding registers byte vectors under canonical names and
//! the engine falls back to them when no file matches.

use std::collections::HashMap;
use std::path::PathBuf;

use keyb_core::host::ResourceStore;
use tracing::debug;

/// A [`ResourceStore`] over a directory plus registered bundled blobs.
pub struct DirResourceStore {
    root: PathBuf,
    bundled: HashMap<String, Vec<u8>>,
}

impl DirResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), bundled: HashMap::new() }
    }

    /// Registers a bundled blob under its canonical file name.
    pub fn register_bundled(&mut self, name: &str, bytes: Vec<u8>) {
        self.bundled.insert(name.to_ascii_lowercase(), bytes);
    }

    /// Builder form of [`DirResourceStore::register_bundled`].
    pub fn with_bundled(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.register_bundled(name, bytes);
        self
    }
}

impl ResourceStore for DirResourceStore {
    fn open(&self, name: &str) -> Option<Vec<u8>> {
        let exact = self.root.join(name);
        if let Ok(bytes) = std::fs::read(&exact) {
            debug!("opened resource {}", exact.display());
            return Some(bytes);
        }
        let lower = self.root.join(name.to_ascii_lowercase());
        if lower != exact {
            if let Ok(bytes) = std::fs::read(&lower) {
                debug!("opened resource {}", lower.display());
                return Some(bytes);
            }
        }
        None
    }

    fn bundled(&self, name: &str) -> Option<Vec<u8>> {
        self.bundled.get(&name.to_ascii_lowercase()).cloned()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
