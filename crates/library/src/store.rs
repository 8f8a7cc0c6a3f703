//! Tile persistence.
//!
//! A [`TileStore`] only has to answer two questions: "is this fingerprint
//! stored?" and "store this tile". The scanner uses the first to skip
//! sources whose largest tile already exists.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use hearth_imaging::Tile;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[async_trait]
pub trait TileStore: Send + Sync {
    async fn put(&self, tile: Tile) -> Result<()>;

    async fn contains(&self, fingerprint: &str) -> Result<bool>;
}

/// Tiles kept in memory, keyed by fingerprint.
#[derive(Default)]
pub struct MemoryStore {
    tiles: RwLock<HashMap<String, Tile>>,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<Tile> {
        self.tiles.read().get(fingerprint).cloned()
    }

    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }
}

#[async_trait]
impl TileStore for MemoryStore {
    async fn put(&self, tile: Tile) -> Result<()> {
        self.tiles.write().insert(tile.fingerprint.clone(), tile);
        Ok(())
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.tiles.read().contains_key(fingerprint))
    }
}

/// Tiles written as flat files: `<root>/<blake3(fingerprint)>.webp`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// tile that [`contains()`](TileStore::contains) reports is always complete.
pub struct DirectoryStore {
    root: PathBuf,
}
impl DirectoryStore {
    /// Use `root` as the tile directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.or_raise(|| ErrorKind::Store(root.display().to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the tile with `fingerprint` lives on disk.
    pub fn tile_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join(format!("{}.webp", blake3::hash(fingerprint.as_bytes()).to_hex()))
    }
}

#[async_trait]
impl TileStore for DirectoryStore {
    async fn put(&self, tile: Tile) -> Result<()> {
        let target = self.tile_path(&tile.fingerprint);
        let partial = target.with_extension("webp.part");
        let error = || ErrorKind::Store(tile.fingerprint.clone());
        fs::write(&partial, &tile.bytes).await.or_raise(error)?;
        fs::rename(&partial, &target).await.or_raise(error)?;
        tracing::trace!(fingerprint = %tile.fingerprint, path = %target.display(), "stored tile");
        Ok(())
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool> {
        fs::try_exists(self.tile_path(fingerprint)).await.or_raise(|| ErrorKind::Store(fingerprint.to_string()))
    }
}
