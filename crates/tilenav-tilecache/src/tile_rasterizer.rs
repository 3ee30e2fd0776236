//! Per-tile voxelization of the indexed mesh

use tilenav_common::{Rect, Result};
use tilenav_recast::{
    mark_convex_poly_area, BuildContext, BuildStage, ChunkyTriMesh, Heightfield, RecastBuilder,
    RecastConfig,
};

use crate::config::TileCacheConfig;
use crate::obstacle::ObstacleVolume;
use crate::tile_grid::{TileCoord, TileGrid};
use crate::tile_layer::TileLayer;

/// Rasterizes the triangles under one tile into a [`TileLayer`]
#[derive(Debug, Clone, Copy)]
pub struct TileRasterizer<'a> {
    index: &'a ChunkyTriMesh,
    grid: &'a TileGrid,
    config: &'a TileCacheConfig,
}

impl<'a> TileRasterizer<'a> {
    pub fn new(index: &'a ChunkyTriMesh, grid: &'a TileGrid, config: &'a TileCacheConfig) -> Self {
        Self {
            index,
            grid,
            config,
        }
    }

    /// Voxel configuration of a tile, bounds grown by the border
    pub fn tile_config(&self, coord: TileCoord) -> RecastConfig {
        let (bmin, bmax) = self.grid.tile_bounds(coord);
        self.config.recast_config(bmin, bmax)
    }

    /// Rasterizes and filters the triangles overlapping the padded tile
    pub fn rasterize(&self, coord: TileCoord, ctx: &mut BuildContext) -> Result<Heightfield> {
        self.grid.check(coord)?;
        let config = self.tile_config(coord);
        let query = Rect::new(
            [config.bmin.x, config.bmin.z],
            [config.bmax.x, config.bmax.z],
        );
        let tri_ids = self.index.query(&query);

        let builder = RecastBuilder::new(config);
        let mut hf = builder.build_heightfield(
            self.index.vertices(),
            self.index.triangles(),
            &tri_ids,
            ctx,
        )?;
        builder.filter_heightfield(&mut hf, ctx);

        log::trace!(
            "Rasterized tile {coord}: {} triangles, {} spans",
            tri_ids.len(),
            hf.span_count()
        );
        Ok(hf)
    }

    /// Rasterizes a tile and marks the static volumes, then `obstacles` in
    /// order so the last overlapping obstacle decides the area
    pub fn rasterize_tile(
        &self,
        coord: TileCoord,
        obstacles: &[&ObstacleVolume],
        ctx: &mut BuildContext,
    ) -> Result<TileLayer> {
        let mut hf = self.rasterize(coord, ctx)?;

        ctx.start_timer(BuildStage::MarkAreas);
        for volume in self.config.convex_volumes.iter().chain(obstacles.iter().copied()) {
            mark_convex_poly_area(&mut hf, volume);
        }
        ctx.stop_timer(BuildStage::MarkAreas);

        TileLayer::from_heightfield(coord, hf)
    }
}
