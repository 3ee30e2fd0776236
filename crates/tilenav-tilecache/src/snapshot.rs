//! Persisted tile cache state
//!
//! A snapshot keeps what cannot be recomputed cheaply: the compressed
//! layers, the obstacle registry and the dirty set. The navmesh itself is
//! rebuilt from the layers by [`TileCache::restore`](crate::TileCache::restore).

use tilenav_common::{Error, Result};

use crate::config::TileCacheConfig;
use crate::obstacle::ObstacleRegistry;
use crate::tile_grid::{TileCoord, TileGrid};
use crate::tile_layer::CompressedTileLayer;

/// Version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable state of a [`TileCache`](crate::TileCache)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheSnapshot {
    pub version: u32,
    pub config: TileCacheConfig,
    pub grid: TileGrid,
    /// Triangle count of the indexed mesh the snapshot was taken over
    pub triangle_count: usize,
    pub layers: Vec<CompressedTileLayer>,
    pub obstacles: ObstacleRegistry,
    pub dirty: Vec<TileCoord>,
}

impl TileCacheSnapshot {
    /// Total size of the stored compressed layers
    pub fn compressed_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.compressed_size()).sum()
    }

    /// Checks the version and the obstacle registry bookkeeping
    pub fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        if self.obstacles.max_obstacles() != self.config.max_obstacles {
            return Err(Error::Snapshot(format!(
                "obstacle limit {} does not match the configured {}",
                self.obstacles.max_obstacles(),
                self.config.max_obstacles
            )));
        }
        self.obstacles.validate()
    }

    /// Serializes the snapshot to JSON bytes
    #[cfg(feature = "serialization")]
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Snapshot(format!("JSON encode failed: {e}")))
    }

    /// Deserializes a snapshot from JSON bytes
    #[cfg(feature = "serialization")]
    pub fn from_json_bytes(data: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Snapshot(format!("JSON decode failed: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serializes the snapshot to compact binary bytes
    #[cfg(feature = "serialization")]
    pub fn to_binary_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| Error::Snapshot(format!("binary encode failed: {e}")))
    }

    /// Deserializes a snapshot from binary bytes
    #[cfg(feature = "serialization")]
    pub fn from_binary_bytes(data: &[u8]) -> Result<Self> {
        let snapshot: Self = postcard::from_bytes(data)
            .map_err(|e| Error::Snapshot(format!("binary decode failed: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Saves the snapshot to a JSON file
    #[cfg(feature = "serialization")]
    pub fn save_to_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Snapshot(format!("JSON encode failed: {e}")))?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("Saved tile cache snapshot to {}", path.as_ref().display());
        Ok(())
    }

    /// Loads a snapshot from a JSON file
    #[cfg(feature = "serialization")]
    pub fn load_from_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let json = std::fs::read(path.as_ref())?;
        let snapshot = Self::from_json_bytes(&json)?;
        log::info!(
            "Loaded tile cache snapshot from {}: {} layers",
            path.as_ref().display(),
            snapshot.layers.len()
        );
        Ok(snapshot)
    }
}
