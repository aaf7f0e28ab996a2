//! Named PKCS#12 containers.
//!
//! A [`CertificateStore`] hands raw container bytes to the signer by name.
//! [`DirectoryStore`] reads `.p12`/`.pfx` files from one directory,
//! [`MemoryStore`] keeps them in a map.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extensions recognised as PKCS#12 containers.
const CONTAINER_EXTENSIONS: [&str; 2] = ["p12", "pfx"];

/// Source of PKCS#12 containers.
pub trait CertificateStore: Send + Sync {
    /// Raw container bytes for `name`.
    fn load(&self, name: &str) -> Result<Vec<u8>>;

    /// Names that [`load`](Self::load) accepts, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// Containers stored as files in one directory.
///
/// A name is a file stem (`signer` for `signer.p12`) or a full file name.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Use `root` as the container directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The container directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let is_plain = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if !is_plain {
            return Err(Error::CertificateNotFound(name.to_string()));
        }

        let direct = self.root.join(name);
        if direct.is_file() && has_container_extension(&direct) {
            return Ok(direct);
        }

        // Stems match the names `list` reports, whatever the extension case.
        let mut matches = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(name);
            if stem_matches && path.is_file() && has_container_extension(&path) {
                matches.push(path);
            }
        }
        matches.sort();
        matches
            .into_iter()
            .next()
            .ok_or_else(|| Error::CertificateNotFound(name.to_string()))
    }
}

fn has_container_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CONTAINER_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

impl CertificateStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        log::debug!("Reading certificate container {}", path.display());
        Ok(std::fs::read(path)?)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() && has_container_extension(&path) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Containers held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a container.
    pub fn insert(&mut self, name: impl Into<String>, container: Vec<u8>) {
        self.entries.insert(name.into(), container);
    }

    /// Remove a container, returning its bytes.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.remove(name)
    }
}

impl CertificateStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CertificateNotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}
