//! Voxelization and polygon mesh generation for tiled navigation meshes
//!
//! Input triangles are rasterized into a solid [`Heightfield`], filtered for
//! walkability, compacted into open-space spans and partitioned into regions
//! with a watershed flood. Region outlines are traced into contours, which
//! are triangulated and merged into a convex [`PolyMesh`] with a height
//! accurate [`PolyMeshDetail`].
//!
//! The [`ChunkyTriMesh`] index answers which triangles touch a rectangle so a
//! tile only rasterizes the geometry under its footprint.
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use tilenav_recast::{BuildContext, RecastBuilder, RecastConfig};
//!
//! let vertices = [[0.0, 0.0, 0.0], [0.0, 0.0, 10.0], [10.0, 0.0, 10.0], [10.0, 0.0, 0.0]];
//! let triangles = [[0, 1, 2], [0, 2, 3]];
//!
//! let mut config = RecastConfig {
//!     cs: 0.5,
//!     ch: 0.2,
//!     walkable_radius: 0,
//!     ..Default::default()
//! };
//! config.calculate_grid_size(Vec3::new(0.0, -1.0, 0.0), Vec3::new(10.0, 1.0, 10.0));
//!
//! let builder = RecastBuilder::new(config);
//! let mut ctx = BuildContext::new();
//! let mut hf = builder.build_heightfield(&vertices, &triangles, &[0, 1], &mut ctx)?;
//! builder.filter_heightfield(&mut hf, &mut ctx);
//! let result = builder.build_meshes(&hf, &mut ctx)?;
//! assert!(result.poly_mesh.npolys > 0);
//! # Ok::<(), tilenav_common::Error>(())
//! ```

mod area;
mod chunky_tri_mesh;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod convex_volume;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polymesh;
mod rasterization;
mod watershed;

pub use area::{erode_walkable_area, mark_convex_poly_area};
pub use chunky_tri_mesh::{ChunkKind, ChunkNode, ChunkyTriMesh, TriMesh};
pub use compact_heightfield::{CompactCell, CompactHeightfield, CompactSpan, BORDER_REG, NOT_CONNECTED};
pub use config::{RecastConfig, MAX_VERTS_PER_POLY};
pub use context::{BuildContext, BuildStage};
pub use contour::{BuildContoursFlags, Contour, ContourSet, ContourVertex};
pub use convex_volume::{ConvexVolume, MAX_CONVEX_VOLUME_VERTS};
pub use detail_mesh::PolyMeshDetail;
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span, NULL_AREA, SPAN_MAX_HEIGHT, WALKABLE_AREA};
pub use polymesh::{PolyMesh, MESH_NULL_IDX, PORTAL_FLAG};
pub use rasterization::{mark_walkable_triangles, rasterize_triangle, rasterize_triangles, triangle_area};
pub use watershed::build_regions;

use tilenav_common::Result;

/// Meshes produced from one heightfield
#[derive(Debug, Clone)]
pub struct MeshBuildResult {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: PolyMeshDetail,
    /// Number of regions after merging and filtering
    pub region_count: u16,
    /// Walkable spans left after erosion
    pub walkable_span_count: usize,
}

/// Runs the build pipeline stages for a [`RecastConfig`]
#[derive(Debug, Clone)]
pub struct RecastBuilder {
    config: RecastConfig,
}

impl RecastBuilder {
    pub fn new(config: RecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Rasterizes the triangles listed in `tri_ids` into a heightfield
    /// covering the configured bounds
    pub fn build_heightfield(
        &self,
        vertices: &[[f32; 3]],
        triangles: &[[u32; 3]],
        tri_ids: &[u32],
        ctx: &mut BuildContext,
    ) -> Result<Heightfield> {
        self.config.validate()?;
        let cfg = &self.config;

        ctx.start_timer(BuildStage::Rasterize);
        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch);
        let areas = mark_walkable_triangles(cfg.walkable_slope_angle, vertices, triangles, tri_ids);
        rasterize_triangles(&mut hf, vertices, triangles, tri_ids, &areas, cfg.walkable_climb);
        ctx.stop_timer(BuildStage::Rasterize);

        Ok(hf)
    }

    /// Applies the enabled walkability filters in pipeline order
    pub fn filter_heightfield(&self, hf: &mut Heightfield, ctx: &mut BuildContext) {
        let cfg = &self.config;
        ctx.start_timer(BuildStage::Filter);
        if cfg.filter_low_hanging_obstacles {
            hf.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
        }
        if cfg.filter_ledge_spans {
            hf.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
        }
        if cfg.filter_walkable_low_height_spans {
            hf.filter_walkable_low_height_spans(cfg.walkable_height);
        }
        ctx.stop_timer(BuildStage::Filter);
    }

    /// Builds the polygon and detail meshes of a filtered heightfield
    pub fn build_meshes(&self, hf: &Heightfield, ctx: &mut BuildContext) -> Result<MeshBuildResult> {
        let cfg = &self.config;

        ctx.start_timer(BuildStage::Compact);
        let mut chf = CompactHeightfield::build(cfg.walkable_height, cfg.walkable_climb, hf)?;
        ctx.stop_timer(BuildStage::Compact);

        ctx.start_timer(BuildStage::Erode);
        if cfg.walkable_radius > 0 {
            erode_walkable_area(&mut chf, cfg.walkable_radius);
        }
        ctx.stop_timer(BuildStage::Erode);

        ctx.start_timer(BuildStage::Regions);
        build_distance_field(&mut chf);
        build_regions(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)?;
        ctx.stop_timer(BuildStage::Regions);

        ctx.start_timer(BuildStage::Contours);
        let cset = ContourSet::build(
            &chf,
            cfg.max_simplification_error,
            cfg.max_edge_len,
            BuildContoursFlags::default(),
        )?;
        ctx.stop_timer(BuildStage::Contours);

        ctx.start_timer(BuildStage::PolyMesh);
        let poly_mesh = PolyMesh::build_from_contour_set(&cset, cfg.max_vertices_per_polygon)?;
        ctx.stop_timer(BuildStage::PolyMesh);

        ctx.start_timer(BuildStage::DetailMesh);
        let detail_mesh = PolyMeshDetail::build(
            &poly_mesh,
            &chf,
            cfg.detail_sample_dist,
            cfg.detail_sample_max_error,
        )?;
        ctx.stop_timer(BuildStage::DetailMesh);

        let walkable_span_count = chf.areas.iter().filter(|&&a| a != NULL_AREA).count();
        Ok(MeshBuildResult {
            poly_mesh,
            detail_mesh,
            region_count: chf.max_regions,
            walkable_span_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn quad_builder(size: f32, cs: f32) -> RecastBuilder {
        let mut config = RecastConfig {
            cs,
            ch: 0.2,
            walkable_radius: 0,
            filter_ledge_spans: false,
            min_region_area: 4,
            ..Default::default()
        };
        config.calculate_grid_size(Vec3::new(0.0, -1.0, 0.0), Vec3::new(size, 1.0, size));
        RecastBuilder::new(config)
    }

    fn quad(size: f32) -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
        (
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, size], [size, 0.0, size], [size, 0.0, 0.0]],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_flat_quad_builds_single_polygon() {
        let builder = quad_builder(10.0, 0.5);
        let (vertices, triangles) = quad(10.0);
        let mut ctx = BuildContext::new();

        let mut hf = builder
            .build_heightfield(&vertices, &triangles, &[0, 1], &mut ctx)
            .unwrap();
        assert_eq!(hf.walkable_span_count(), 400);
        builder.filter_heightfield(&mut hf, &mut ctx);

        let result = builder.build_meshes(&hf, &mut ctx).unwrap();
        assert_eq!(result.region_count, 1);
        assert_eq!(result.poly_mesh.npolys, 1);
        assert_eq!(result.poly_mesh.poly_verts(0).len(), 4);
        assert_eq!(result.detail_mesh.meshes.len(), 1);
        assert_eq!(result.walkable_span_count, 400);

        for &v in result.poly_mesh.poly_verts(0) {
            let p = result.poly_mesh.vert_world(v as usize);
            let on_x_edge = p.x.abs() < 1e-4 || (p.x - 10.0).abs() < 1e-4;
            let on_z_edge = p.z.abs() < 1e-4 || (p.z - 10.0).abs() < 1e-4;
            assert!(on_x_edge && on_z_edge, "unexpected corner {p:?}");
        }
        assert!(ctx.timing(BuildStage::Regions) <= ctx.total());
    }

    #[test]
    fn test_steep_triangles_are_not_walkable() {
        let builder = quad_builder(10.0, 0.5);
        let vertices = vec![[0.0, 0.0, 0.0], [0.0, 10.0, 0.0], [10.0, 0.0, 0.0]];
        let mut ctx = BuildContext::disabled();
        let hf = builder
            .build_heightfield(&vertices, &[[0, 1, 2]], &[0], &mut ctx)
            .unwrap();
        assert_eq!(hf.walkable_span_count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let builder = RecastBuilder::new(RecastConfig::default());
        let (vertices, triangles) = quad(1.0);
        let mut ctx = BuildContext::disabled();
        assert!(builder
            .build_heightfield(&vertices, &triangles, &[0, 1], &mut ctx)
            .is_err());
    }
}
