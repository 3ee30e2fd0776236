//! Builds navmesh tiles from stored tile layers

use glam::Vec3;
use tilenav_common::{Error, Result};
use tilenav_recast::{
    BuildContext, BuildStage, MeshBuildResult, RecastBuilder, MESH_NULL_IDX, PORTAL_FLAG,
};

use crate::config::TileCacheConfig;
use crate::nav_mesh::{DetailSubMesh, NavMeshTile, NavPoly, PolyNeighbour};
use crate::tile_grid::{TileCoord, TileGrid, TileSide};
use crate::tile_layer::TileLayer;

/// Summary of one tile build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileBuildStats {
    pub span_count: usize,
    pub walkable_span_count: usize,
    pub region_count: usize,
    pub poly_count: usize,
    pub vert_count: usize,
    pub detail_tri_count: usize,
    /// Size of the stored compressed layer
    pub compressed_size: usize,
    /// Size of the uncompressed layer bytes
    pub raw_size: usize,
}

/// Runs regions, contours, polygons and detail meshes over a layer
#[derive(Debug, Clone, Copy)]
pub struct NavMeshTileBuilder<'a> {
    config: &'a TileCacheConfig,
    grid: &'a TileGrid,
}

impl<'a> NavMeshTileBuilder<'a> {
    pub fn new(config: &'a TileCacheConfig, grid: &'a TileGrid) -> Self {
        Self { config, grid }
    }

    /// Builds the navmesh tile of a layer
    ///
    /// A layer without walkable spans, a tile without polygons and a tile
    /// over the polygon budget all fail with [`Error::TileBuild`].
    pub fn build(
        &self,
        layer: &TileLayer,
        ctx: &mut BuildContext,
    ) -> Result<(NavMeshTile, TileBuildStats)> {
        let coord = layer.coord;
        self.grid.check(coord)?;

        let mut stats = TileBuildStats {
            span_count: layer.span_count(),
            walkable_span_count: layer.walkable_span_count(),
            raw_size: layer.byte_size(),
            ..Default::default()
        };
        if stats.walkable_span_count == 0 {
            return Err(tile_error(coord, "no walkable spans"));
        }

        let (bmin, bmax) = self.grid.tile_bounds(coord);
        let config = self.config.recast_config(bmin, bmax);
        if layer.width as i32 != config.width || layer.height as i32 != config.height {
            return Err(Error::CorruptLayer(format!(
                "layer of tile {coord} is {}x{} cells, expected {}x{}",
                layer.width, layer.height, config.width, config.height
            )));
        }

        let hf = layer.to_heightfield()?;
        let result = RecastBuilder::new(config).build_meshes(&hf, ctx)?;

        let npolys = result.poly_mesh.npolys;
        if npolys == 0 {
            return Err(tile_error(coord, "no polygons"));
        }
        if npolys > self.config.max_polys_per_tile {
            return Err(tile_error(
                coord,
                &format!(
                    "{npolys} polygons exceed the limit of {}",
                    self.config.max_polys_per_tile
                ),
            ));
        }

        ctx.start_timer(BuildStage::Assemble);
        let tile = assemble_tile(coord, bmin, bmax, &result);
        ctx.stop_timer(BuildStage::Assemble);

        stats.region_count = result.region_count as usize;
        stats.poly_count = tile.poly_count();
        stats.vert_count = tile.vert_count();
        stats.detail_tri_count = tile.detail_tris.len();
        Ok((tile, stats))
    }
}

fn tile_error(coord: TileCoord, reason: &str) -> Error {
    Error::TileBuild {
        x: coord.x,
        y: coord.y,
        reason: reason.to_string(),
    }
}

fn assemble_tile(coord: TileCoord, bmin: Vec3, bmax: Vec3, result: &MeshBuildResult) -> NavMeshTile {
    let pm = &result.poly_mesh;
    let dm = &result.detail_mesh;

    let polys = (0..pm.npolys)
        .map(|i| {
            let verts = pm.poly_verts(i).to_vec();
            let neighbours = pm.neighbours(i)[..verts.len()]
                .iter()
                .map(|&nb| {
                    if nb == MESH_NULL_IDX {
                        PolyNeighbour::None
                    } else if nb & PORTAL_FLAG != 0 {
                        TileSide::from_portal(nb & 0xf)
                            .map_or(PolyNeighbour::None, PolyNeighbour::Portal)
                    } else {
                        PolyNeighbour::Internal(nb)
                    }
                })
                .collect();
            NavPoly {
                verts,
                neighbours,
                area: pm.areas[i],
                region: pm.regs[i],
            }
        })
        .collect();

    NavMeshTile {
        coord,
        bmin,
        bmax,
        verts: (0..pm.vert_count()).map(|i| pm.vert_world(i)).collect(),
        polys,
        detail_meshes: dm
            .meshes
            .iter()
            .map(|m| DetailSubMesh {
                vert_base: m[0],
                vert_count: m[1],
                tri_base: m[2],
                tri_count: m[3],
            })
            .collect(),
        detail_verts: dm.verts.clone(),
        detail_tris: dm.tris.clone(),
        links: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstacle::ObstacleVolume;
    use crate::tile_rasterizer::TileRasterizer;
    use tilenav_recast::{ChunkyTriMesh, TriMesh, NULL_AREA};

    fn setup(config: TileCacheConfig) -> (ChunkyTriMesh, TileGrid, TileCacheConfig) {
        let mesh = TriMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [0.0, 0.0, 20.0],
                [20.0, 0.0, 20.0],
                [20.0, 0.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let index = ChunkyTriMesh::build(mesh, config.tris_per_chunk).unwrap();
        let (bmin, bmax) = index.bounds();
        let grid = TileGrid::new(bmin, bmax, config.cell_size, config.tile_cells()).unwrap();
        (index, grid, config)
    }

    fn flat_config() -> TileCacheConfig {
        TileCacheConfig::new()
            .with_cell_size(0.5, 0.2)
            .with_tile_size(10.0)
            .with_agent(0.0, 2.0, 0.9, 45.0)
            .with_filters(true, false, true)
    }

    #[test]
    fn test_flat_tile_is_one_quad() {
        let (index, grid, config) = setup(flat_config());
        let mut ctx = BuildContext::new();
        let layer = TileRasterizer::new(&index, &grid, &config)
            .rasterize_tile(TileCoord::new(1, 0), &[], &mut ctx)
            .unwrap();
        let (tile, stats) = NavMeshTileBuilder::new(&config, &grid)
            .build(&layer, &mut ctx)
            .unwrap();

        assert_eq!(tile.poly_count(), 1);
        assert_eq!(tile.polys[0].verts.len(), 4);
        assert_eq!(stats.poly_count, 1);
        assert_eq!(stats.region_count, 1);
        assert!(stats.detail_tri_count >= 2);
        assert!((tile.walkable_area() - 100.0).abs() < 1e-3);

        for v in &tile.verts {
            assert!(v.x >= 10.0 - 1e-4 && v.x <= 20.0 + 1e-4);
            assert!(v.z >= -1e-4 && v.z <= 10.0 + 1e-4);
        }
        // Interior borders face neighbouring tiles; the mesh rim lies on the
        // tile border as well.
        assert_eq!(tile.portal_edges(TileSide::XMin).count(), 1);
        assert_eq!(tile.portal_edges(TileSide::ZMax).count(), 1);
        assert!(ctx.timing(BuildStage::Assemble) <= ctx.total());
    }

    #[test]
    fn test_carved_layer_fails_as_tile_error() {
        let (index, grid, config) = setup(flat_config());
        let mut ctx = BuildContext::disabled();
        let everything =
            ObstacleVolume::box_aabb([-5.0, -1.0, -5.0], [25.0, 1.0, 25.0], NULL_AREA).unwrap();
        let layer = TileRasterizer::new(&index, &grid, &config)
            .rasterize_tile(TileCoord::new(0, 0), &[&everything], &mut ctx)
            .unwrap();
        let err = NavMeshTileBuilder::new(&config, &grid)
            .build(&layer, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::TileBuild { x: 0, y: 0, .. }));
        assert!(err.is_tile_local());
    }

    #[test]
    fn test_polygon_budget() {
        let (index, grid, config) = setup(flat_config().with_max_polys_per_tile(1));
        let mut ctx = BuildContext::disabled();
        let post = ObstacleVolume::box_aabb([4.0, -1.0, 4.0], [6.0, 1.0, 6.0], NULL_AREA).unwrap();
        let layer = TileRasterizer::new(&index, &grid, &config)
            .rasterize_tile(TileCoord::new(0, 0), &[&post], &mut ctx)
            .unwrap();
        let err = NavMeshTileBuilder::new(&config, &grid)
            .build(&layer, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::TileBuild { .. }));
    }

    #[test]
    fn test_mismatched_layer_is_rejected() {
        let (index, grid, config) = setup(flat_config());
        let mut ctx = BuildContext::disabled();
        let layer = TileRasterizer::new(&index, &grid, &config)
            .rasterize_tile(TileCoord::new(0, 0), &[], &mut ctx)
            .unwrap();

        let other = flat_config().with_agent(1.0, 2.0, 0.9, 45.0);
        let err = NavMeshTileBuilder::new(&other, &grid)
            .build(&layer, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::CorruptLayer(_)));
    }
}
