//! Tile cache owning layers, obstacles and the assembled navmesh
//!
//! The cache slices the indexed mesh into a [`TileGrid`]. Each tile is
//! rasterized into a compressed [`TileLayer`], built into a navmesh tile and
//! swapped into the shared [`NavMesh`]. Adding or removing an obstacle only
//! marks the tiles it touches dirty; [`TileCache::update`] rebuilds them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tilenav_common::{Error, Result};
use tilenav_recast::{BuildContext, ChunkyTriMesh, TriMesh};

use crate::compressor::{Lz4Compressor, TileCompressor};
use crate::config::TileCacheConfig;
use crate::nav_mesh::NavMesh;
use crate::obstacle::{ObstacleHandle, ObstacleRegistry, ObstacleVolume};
use crate::snapshot::{TileCacheSnapshot, SNAPSHOT_VERSION};
use crate::tile_builder::{NavMeshTileBuilder, TileBuildStats};
use crate::tile_grid::{TileCoord, TileGrid};
use crate::tile_layer::{CompressedTileLayer, TileLayer};
use crate::tile_rasterizer::TileRasterizer;

/// Result of a successful tile build
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBuildOutcome {
    pub coord: TileCoord,
    pub stats: TileBuildStats,
    /// Time spent in the timed build stages
    pub build_time: Duration,
}

/// Summary of [`TileCache::build_all`]
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<TileCoord>,
    /// Tiles without navmesh, empty tiles included
    pub failed: Vec<(TileCoord, Error)>,
    pub layer_count: usize,
    pub compressed_bytes: usize,
    pub raw_bytes: usize,
}

/// Summary of one [`TileCache::update`] pass
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub rebuilt: Vec<TileCoord>,
    pub failed: Vec<(TileCoord, Error)>,
    /// Tiles still dirty after this pass
    pub remaining: usize,
}

impl UpdateReport {
    /// True when no dirty tiles are left
    pub fn is_up_to_date(&self) -> bool {
        self.remaining == 0
    }

    /// Every tile processed in this pass, rebuilt or failed
    pub fn processed(&self) -> Vec<TileCoord> {
        let mut tiles: Vec<_> = self
            .rebuilt
            .iter()
            .copied()
            .chain(self.failed.iter().map(|(c, _)| *c))
            .collect();
        tiles.sort();
        tiles
    }
}

/// Tiled navmesh with runtime obstacles
#[derive(Debug)]
pub struct TileCache {
    config: TileCacheConfig,
    index: Arc<ChunkyTriMesh>,
    grid: TileGrid,
    compressor: Box<dyn TileCompressor>,
    layers: RwLock<BTreeMap<TileCoord, CompressedTileLayer>>,
    nav_mesh: Arc<RwLock<NavMesh>>,
    obstacles: ObstacleRegistry,
    dirty: BTreeSet<TileCoord>,
}

impl TileCache {
    /// Creates an empty cache over an indexed mesh; no tile is built yet
    pub fn new(index: Arc<ChunkyTriMesh>, config: TileCacheConfig) -> Result<Self> {
        config.validate()?;
        let (bmin, bmax) = index.bounds();
        let grid = TileGrid::new(bmin, bmax, config.cell_size, config.tile_cells())?;
        let nav_mesh = NavMesh::new(config.cell_size * 0.25, config.agent_max_climb);

        log::info!(
            "Created tile cache: {}x{} tiles of {} cells over {} triangles",
            grid.width(),
            grid.height(),
            grid.tile_cells(),
            index.triangle_count()
        );

        Ok(Self {
            obstacles: ObstacleRegistry::new(config.max_obstacles),
            config,
            index,
            grid,
            compressor: Box::new(Lz4Compressor),
            layers: RwLock::new(BTreeMap::new()),
            nav_mesh: Arc::new(RwLock::new(nav_mesh)),
            dirty: BTreeSet::new(),
        })
    }

    /// Indexes `mesh` and creates a cache over it
    pub fn from_mesh(mesh: TriMesh, config: TileCacheConfig) -> Result<Self> {
        config.validate()?;
        let index = ChunkyTriMesh::build(mesh, config.tris_per_chunk)?;
        Self::new(Arc::new(index), config)
    }

    /// Replaces the layer compressor, re-encoding stored layers
    pub fn with_compressor(mut self, compressor: Box<dyn TileCompressor>) -> Result<Self> {
        {
            let layers = self.layers.get_mut().map_err(|_| Error::LockPoisoned)?;
            for stored in layers.values_mut() {
                let layer = stored.decompress(self.compressor.as_ref())?;
                *stored = layer.compress(compressor.as_ref())?;
            }
        }
        self.compressor = compressor;
        Ok(self)
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn index(&self) -> &Arc<ChunkyTriMesh> {
        &self.index
    }

    /// Shared handle to the assembled navmesh
    pub fn nav_mesh(&self) -> Arc<RwLock<NavMesh>> {
        Arc::clone(&self.nav_mesh)
    }

    fn read_layers(&self) -> Result<RwLockReadGuard<'_, BTreeMap<TileCoord, CompressedTileLayer>>> {
        self.layers.read().map_err(|_| Error::LockPoisoned)
    }

    fn write_nav_mesh(&self) -> Result<RwLockWriteGuard<'_, NavMesh>> {
        self.nav_mesh.write().map_err(|_| Error::LockPoisoned)
    }

    /// Rasterizes a tile with the current obstacles and rebuilds its navmesh tile
    ///
    /// The layer is stored even when the tile ends up without polygons; in
    /// that case the previous navmesh tile is removed and
    /// [`Error::TileBuild`] is returned.
    pub fn build_tile(&self, coord: TileCoord) -> Result<TileBuildOutcome> {
        self.grid.check(coord)?;
        let mut ctx = BuildContext::new();

        let obstacles: Vec<&ObstacleVolume> = self
            .obstacles
            .ordered()
            .into_iter()
            .map(|o| &o.volume)
            .collect();
        let layer = TileRasterizer::new(&self.index, &self.grid, &self.config)
            .rasterize_tile(coord, &obstacles, &mut ctx)?;

        let stored = layer.compress(self.compressor.as_ref())?;
        let compressed_size = stored.compressed_size();
        self.layers
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .insert(coord, stored);

        self.build_from_layer(&layer, compressed_size, &mut ctx)
    }

    /// Rebuilds the navmesh tile from the stored layer without re-rasterizing
    pub fn rebuild_from_layer(&self, coord: TileCoord) -> Result<TileBuildOutcome> {
        self.grid.check(coord)?;
        let (layer, compressed_size) = {
            let layers = self.read_layers()?;
            let stored = layers.get(&coord).ok_or_else(|| Error::TileBuild {
                x: coord.x,
                y: coord.y,
                reason: "no stored layer".to_string(),
            })?;
            (
                stored.decompress(self.compressor.as_ref())?,
                stored.compressed_size(),
            )
        };
        let mut ctx = BuildContext::new();
        self.build_from_layer(&layer, compressed_size, &mut ctx)
    }

    fn build_from_layer(
        &self,
        layer: &TileLayer,
        compressed_size: usize,
        ctx: &mut BuildContext,
    ) -> Result<TileBuildOutcome> {
        let coord = layer.coord;
        match NavMeshTileBuilder::new(&self.config, &self.grid).build(layer, ctx) {
            Ok((tile, mut stats)) => {
                stats.compressed_size = compressed_size;
                {
                    let mut nav_mesh = self.write_nav_mesh()?;
                    nav_mesh.insert(tile);
                    nav_mesh.connect_borders(coord);
                }
                ctx.log_timings(&format!("tile {coord}"));
                log::debug!(
                    "Built tile {coord}: {} polys, {} verts, {} regions",
                    stats.poly_count,
                    stats.vert_count,
                    stats.region_count
                );
                Ok(TileBuildOutcome {
                    coord,
                    stats,
                    build_time: ctx.total(),
                })
            }
            Err(err) => {
                if err.is_tile_local() {
                    self.write_nav_mesh()?.remove(coord);
                    log::debug!("Tile {coord} has no navmesh: {err}");
                } else {
                    log::warn!("Failed to build tile {coord}: {err}");
                }
                Err(err)
            }
        }
    }

    /// Builds every tile of the grid and clears the dirty set
    pub fn build_all(&mut self) -> BuildReport {
        let mut report = BuildReport::default();
        let coords: Vec<TileCoord> = self.grid.coords().collect();
        for coord in coords {
            match self.build_tile(coord) {
                Ok(outcome) => report.built.push(outcome.coord),
                Err(err) => report.failed.push((coord, err)),
            }
        }
        self.dirty.clear();

        let layers = self.layers.read().unwrap_or_else(PoisonError::into_inner);
        report.layer_count = layers.len();
        report.compressed_bytes = layers.values().map(|l| l.compressed_size()).sum();
        report.raw_bytes = layers.values().map(|l| l.raw_size).sum();

        log::info!(
            "Built {} of {} tiles, {} without navmesh, layers {} bytes ({} raw)",
            report.built.len(),
            self.grid.tile_count(),
            report.failed.len(),
            report.compressed_bytes,
            report.raw_bytes
        );
        report
    }

    /// Tiles whose padded rectangle intersects the volume footprint
    pub fn tiles_touched_by(&self, volume: &ObstacleVolume) -> Vec<TileCoord> {
        let pad = self.config.border_width();
        self.grid
            .tiles_overlapping(&volume.footprint().expanded(pad))
            .into_iter()
            .filter(|&coord| volume.overlaps_rect(&self.grid.tile_rect(coord).expanded(pad)))
            .collect()
    }

    /// Registers an obstacle and marks the tiles it touches dirty
    pub fn add_obstacle(&mut self, volume: ObstacleVolume) -> Result<ObstacleHandle> {
        let touched = self.tiles_touched_by(&volume);
        let handle = self.obstacles.insert(volume)?;
        self.dirty.extend(touched.iter().copied());
        log::debug!("Added obstacle {handle}, {} tiles dirty", touched.len());
        Ok(handle)
    }

    /// Unregisters an obstacle and marks the tiles it touched dirty
    pub fn remove_obstacle(&mut self, handle: ObstacleHandle) -> Result<()> {
        let obstacle = self.obstacles.remove(handle)?;
        let touched = self.tiles_touched_by(&obstacle.volume);
        self.dirty.extend(touched.iter().copied());
        log::debug!("Removed obstacle {handle}, {} tiles dirty", touched.len());
        Ok(())
    }

    /// Rebuilds every dirty tile
    pub fn update(&mut self) -> UpdateReport {
        self.update_limited(usize::MAX)
    }

    /// Rebuilds at most `max_tiles` dirty tiles in ascending coordinate order
    ///
    /// Failed tiles are reported and no longer dirty.
    pub fn update_limited(&mut self, max_tiles: usize) -> UpdateReport {
        let batch: Vec<TileCoord> = self.dirty.iter().copied().take(max_tiles).collect();
        for coord in &batch {
            self.dirty.remove(coord);
        }

        let mut report = UpdateReport::default();
        for coord in batch {
            match self.build_tile(coord) {
                Ok(_) => report.rebuilt.push(coord),
                Err(err) => report.failed.push((coord, err)),
            }
        }
        report.remaining = self.dirty.len();

        if !report.rebuilt.is_empty() || !report.failed.is_empty() {
            log::info!(
                "Updated {} tiles, {} failed, {} still dirty",
                report.rebuilt.len(),
                report.failed.len(),
                report.remaining
            );
        }
        report
    }

    /// Dirty tiles in ascending order
    pub fn dirty_tiles(&self) -> Vec<TileCoord> {
        self.dirty.iter().copied().collect()
    }

    pub fn is_dirty(&self, coord: TileCoord) -> bool {
        self.dirty.contains(&coord)
    }

    pub fn obstacle(&self, handle: ObstacleHandle) -> Option<&ObstacleVolume> {
        self.obstacles.get(handle).map(|o| &o.volume)
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Decoded layer stored for a tile
    pub fn layer(&self, coord: TileCoord) -> Result<Option<TileLayer>> {
        self.read_layers()?
            .get(&coord)
            .map(|stored| stored.decompress(self.compressor.as_ref()))
            .transpose()
    }

    pub fn layer_count(&self) -> usize {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Captures layers, obstacles and dirty tiles
    pub fn snapshot(&self) -> Result<TileCacheSnapshot> {
        Ok(TileCacheSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            grid: self.grid.clone(),
            triangle_count: self.index.triangle_count(),
            layers: self.read_layers()?.values().cloned().collect(),
            obstacles: self.obstacles.clone(),
            dirty: self.dirty_tiles(),
        })
    }

    /// Recreates a cache from a snapshot taken over the same mesh
    ///
    /// Navmesh tiles are rebuilt from the stored layers; dirty tiles stay
    /// dirty until the next [`TileCache::update`].
    pub fn restore(index: Arc<ChunkyTriMesh>, snapshot: TileCacheSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let mut cache = Self::new(index, snapshot.config)?;
        if !cache.grid.matches(&snapshot.grid)
            || cache.index.triangle_count() != snapshot.triangle_count
        {
            return Err(Error::Snapshot(
                "snapshot was taken over a different mesh or tile grid".to_string(),
            ));
        }
        if let Some(coord) = snapshot
            .layers
            .iter()
            .map(|l| l.coord)
            .chain(snapshot.dirty.iter().copied())
            .find(|&c| !cache.grid.contains(c))
        {
            return Err(Error::Snapshot(format!("tile {coord} is outside the grid")));
        }

        cache.obstacles = snapshot.obstacles;
        cache.dirty = snapshot.dirty.into_iter().collect();
        let coords: Vec<TileCoord> = snapshot.layers.iter().map(|l| l.coord).collect();
        *cache.layers.get_mut().map_err(|_| Error::LockPoisoned)? = snapshot
            .layers
            .into_iter()
            .map(|l| (l.coord, l))
            .collect();

        for coord in coords {
            if let Err(err) = cache.rebuild_from_layer(coord) {
                if !err.is_tile_local() {
                    return Err(err);
                }
            }
        }

        log::info!(
            "Restored tile cache: {} layers, {} obstacles, {} dirty tiles",
            cache.layer_count(),
            cache.obstacle_count(),
            cache.dirty.len()
        );
        Ok(cache)
    }
}
