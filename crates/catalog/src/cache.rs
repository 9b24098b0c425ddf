//! Optional on-disk catalog cache
//!
//! Snapshots the last compiled catalog keyed by a blake3 digest of the
//! declarations and facts, so unchanged inputs skip recompilation. Purely
//! an optimization: misses and corrupt entries fall back to compiling.

use crate::compile::{Catalog, source_digest};
use crate::facts::FactStore;
use crate::resource::DeclarationSet;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Directory of catalog snapshots, one JSON file per source digest
#[derive(Debug, Clone)]
pub struct CatalogCache {
    dir: PathBuf,
}

impl CatalogCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.json"))
    }

    /// Load the cached catalog for these inputs, if present and intact
    pub fn load(&self, set: &DeclarationSet, facts: &FactStore) -> Option<Catalog> {
        let digest = source_digest(set, facts);
        let path = self.entry_path(&digest);
        let content = fs::read_to_string(&path).ok()?;
        let catalog: Catalog = match serde_json::from_str(&content) {
            Ok(catalog) => catalog,
            Err(e) => {
                log::warn!("ignoring corrupt catalog cache entry {}: {e}", path.display());
                return None;
            }
        };
        // Stale-write guard: the snapshot must carry the digest it is filed under
        if catalog.digest() != digest {
            log::warn!("ignoring mismatched catalog cache entry {}", path.display());
            return None;
        }
        log::debug!("catalog cache hit: {digest}");
        Some(catalog)
    }

    /// Snapshot a compiled catalog under its source digest
    pub fn store(&self, catalog: &Catalog) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create cache dir {}", self.dir.display()))?;
        let path = self.entry_path(catalog.digest());
        let content = serde_json::to_string_pretty(catalog)?;
        fs::write(&path, content)
            .with_context(|| format!("could not write cache entry {}", path.display()))?;
        Ok(())
    }
}
