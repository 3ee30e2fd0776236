//! World-unit configuration of a tile cache
//!
//! [`TileCacheConfig`] is the bundle a caller fills in. The voxel-space
//! [`RecastConfig`] of each tile is derived from it with
//! [`TileCacheConfig::recast_config`].

use glam::Vec3;
use tilenav_common::{Error, Result};
use tilenav_recast::{ConvexVolume, RecastConfig, MAX_VERTS_PER_POLY};

/// Extra cells rasterized around every tile on top of the agent radius
pub const TILE_BORDER_PADDING: i32 = 3;

/// Largest obstacle registry the 16-bit slot field of a handle can address
pub const MAX_OBSTACLE_SLOTS: usize = 0xffff;

/// Build parameters of a tile cache, in world units
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheConfig {
    /// Maximum vertices per navmesh polygon
    pub verts_per_poly: usize,
    /// Maximum triangles per leaf of the chunk index
    pub tris_per_chunk: usize,

    pub filter_low_hanging_obstacles: bool,
    pub filter_ledge_spans: bool,
    pub filter_walkable_low_height_spans: bool,

    /// Voxel size on the xz plane
    pub cell_size: f32,
    /// Voxel size on the y axis
    pub cell_height: f32,
    /// Edge length of a tile, snapped to whole cells
    pub tile_size: f32,

    /// Steepest walkable slope, in degrees
    pub agent_max_slope: f32,
    /// Highest ledge the agent can step over
    pub agent_max_climb: f32,
    pub agent_radius: f32,
    pub agent_height: f32,

    /// Longest contour edge along the mesh border
    pub edge_max_len: f32,
    /// Maximum deviation of simplified contours, in cells
    pub edge_max_error: f32,
    /// Regions smaller than `region_min_size²` cells are removed
    pub region_min_size: i32,
    /// Regions smaller than `region_merge_size²` cells are merged into a neighbour
    pub region_merge_size: i32,

    /// Detail sampling distance, in cells; values below 0.9 disable sampling
    pub detail_sample_dist: f32,
    /// Maximum detail surface error, in cell heights
    pub detail_sample_max_error: f32,

    /// Maximum number of active obstacles
    pub max_obstacles: usize,
    /// Tiles with more polygons than this fail to build
    pub max_polys_per_tile: usize,
    /// Volumes marked into every tile before the obstacles
    pub convex_volumes: Vec<ConvexVolume>,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            verts_per_poly: 6,
            tris_per_chunk: 256,
            filter_low_hanging_obstacles: true,
            filter_ledge_spans: true,
            filter_walkable_low_height_spans: true,
            cell_size: 0.3,
            cell_height: 0.2,
            tile_size: 14.4,
            agent_max_slope: 45.0,
            agent_max_climb: 0.9,
            agent_radius: 0.6,
            agent_height: 2.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            region_min_size: 8,
            region_merge_size: 20,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            max_obstacles: 128,
            max_polys_per_tile: 4096,
            convex_volumes: Vec::new(),
        }
    }
}

impl TileCacheConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell_size(mut self, cell_size: f32, cell_height: f32) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;
        self
    }

    pub fn with_tile_size(mut self, tile_size: f32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Sets the agent dimensions
    pub fn with_agent(mut self, radius: f32, height: f32, max_climb: f32, max_slope: f32) -> Self {
        self.agent_radius = radius;
        self.agent_height = height;
        self.agent_max_climb = max_climb;
        self.agent_max_slope = max_slope;
        self
    }

    pub fn with_filters(mut self, low_hanging: bool, ledges: bool, low_height: bool) -> Self {
        self.filter_low_hanging_obstacles = low_hanging;
        self.filter_ledge_spans = ledges;
        self.filter_walkable_low_height_spans = low_height;
        self
    }

    pub fn with_edges(mut self, max_len: f32, max_error: f32) -> Self {
        self.edge_max_len = max_len;
        self.edge_max_error = max_error;
        self
    }

    pub fn with_regions(mut self, min_size: i32, merge_size: i32) -> Self {
        self.region_min_size = min_size;
        self.region_merge_size = merge_size;
        self
    }

    pub fn with_detail(mut self, sample_dist: f32, sample_max_error: f32) -> Self {
        self.detail_sample_dist = sample_dist;
        self.detail_sample_max_error = sample_max_error;
        self
    }

    pub fn with_verts_per_poly(mut self, verts_per_poly: usize) -> Self {
        self.verts_per_poly = verts_per_poly;
        self
    }

    pub fn with_tris_per_chunk(mut self, tris_per_chunk: usize) -> Self {
        self.tris_per_chunk = tris_per_chunk;
        self
    }

    pub fn with_max_obstacles(mut self, max_obstacles: usize) -> Self {
        self.max_obstacles = max_obstacles;
        self
    }

    pub fn with_max_polys_per_tile(mut self, max_polys: usize) -> Self {
        self.max_polys_per_tile = max_polys;
        self
    }

    pub fn with_convex_volume(mut self, volume: ConvexVolume) -> Self {
        self.convex_volumes.push(volume);
        self
    }

    /// Tile edge length in cells
    pub fn tile_cells(&self) -> i32 {
        (self.tile_size / self.cell_size).round() as i32
    }

    /// Agent radius in cells, rounded up
    pub fn walkable_radius(&self) -> i32 {
        (self.agent_radius / self.cell_size).ceil() as i32
    }

    /// Padding around each tile, in cells
    pub fn border_size(&self) -> i32 {
        self.walkable_radius() + TILE_BORDER_PADDING
    }

    /// Padding around each tile, in world units
    pub fn border_width(&self) -> f32 {
        self.border_size() as f32 * self.cell_size
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let non_negative = |v: f32| v.is_finite() && v >= 0.0;

        if !positive(self.cell_size) || !positive(self.cell_height) {
            return Err(Error::InvalidConfig(
                "cell size and cell height must be positive".to_string(),
            ));
        }
        if !positive(self.tile_size) || self.tile_cells() < 1 {
            return Err(Error::InvalidConfig(format!(
                "tile size {} is smaller than one cell",
                self.tile_size
            )));
        }
        if self.tile_cells() + 2 * self.border_size() > u16::MAX as i32 {
            return Err(Error::InvalidConfig(format!(
                "tile of {} cells is too large",
                self.tile_cells()
            )));
        }
        if !(3..=MAX_VERTS_PER_POLY).contains(&self.verts_per_poly) {
            return Err(Error::InvalidConfig(format!(
                "vertices per polygon must be in 3..={MAX_VERTS_PER_POLY}"
            )));
        }
        if self.tris_per_chunk == 0 {
            return Err(Error::InvalidConfig(
                "triangles per chunk must be at least 1".to_string(),
            ));
        }
        if !(0.0..=90.0).contains(&self.agent_max_slope) {
            return Err(Error::InvalidConfig(
                "agent max slope must be within 0..=90 degrees".to_string(),
            ));
        }
        if !positive(self.agent_height)
            || !non_negative(self.agent_radius)
            || !non_negative(self.agent_max_climb)
        {
            return Err(Error::InvalidConfig(
                "agent height must be positive, radius and climb non-negative".to_string(),
            ));
        }
        if !non_negative(self.edge_max_len) || !non_negative(self.edge_max_error) {
            return Err(Error::InvalidConfig(
                "edge limits must be non-negative".to_string(),
            ));
        }
        if self.region_min_size < 0 || self.region_merge_size < 0 {
            return Err(Error::InvalidConfig(
                "region sizes must be non-negative".to_string(),
            ));
        }
        if !self.detail_sample_dist.is_finite() || !non_negative(self.detail_sample_max_error) {
            return Err(Error::InvalidConfig(
                "invalid detail sampling parameters".to_string(),
            ));
        }
        if self.max_obstacles == 0 || self.max_obstacles > MAX_OBSTACLE_SLOTS {
            return Err(Error::InvalidConfig(format!(
                "max obstacles must be in 1..={MAX_OBSTACLE_SLOTS}"
            )));
        }
        if self.max_polys_per_tile == 0 {
            return Err(Error::InvalidConfig(
                "max polygons per tile must be at least 1".to_string(),
            ));
        }
        for volume in &self.convex_volumes {
            volume
                .validate()
                .map_err(|e| Error::InvalidConfig(format!("convex volume: {e}")))?;
        }
        Ok(())
    }

    /// Derives the voxel configuration of a tile spanning `bmin..bmax`
    ///
    /// The returned bounds are grown by the border on the xz plane.
    pub fn recast_config(&self, bmin: Vec3, bmax: Vec3) -> RecastConfig {
        let cs = self.cell_size;
        let ch = self.cell_height;
        let walkable_radius = self.walkable_radius();
        let border_size = walkable_radius + TILE_BORDER_PADDING;
        let tile_size = self.tile_cells();
        let pad = Vec3::new(border_size as f32 * cs, 0.0, border_size as f32 * cs);

        RecastConfig {
            width: tile_size + border_size * 2,
            height: tile_size + border_size * 2,
            tile_size,
            border_size,
            cs,
            ch,
            bmin: bmin - pad,
            bmax: bmax + pad,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / ch).ceil() as i32,
            walkable_climb: (self.agent_max_climb / ch).floor() as i32,
            walkable_radius,
            filter_low_hanging_obstacles: self.filter_low_hanging_obstacles,
            filter_ledge_spans: self.filter_ledge_spans,
            filter_walkable_low_height_spans: self.filter_walkable_low_height_spans,
            max_edge_len: (self.edge_max_len / cs) as i32,
            max_simplification_error: self.edge_max_error,
            min_region_area: self.region_min_size * self.region_min_size,
            merge_region_area: self.region_merge_size * self.region_merge_size,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                cs * self.detail_sample_dist
            },
            detail_sample_max_error: ch * self.detail_sample_max_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TileCacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_recast_config_derivation() {
        let config = TileCacheConfig::new()
            .with_cell_size(0.5, 0.25)
            .with_tile_size(10.0)
            .with_agent(0.6, 2.0, 0.9, 45.0)
            .with_regions(4, 10)
            .with_detail(6.0, 2.0);
        let rc = config.recast_config(Vec3::ZERO, Vec3::new(10.0, 1.0, 10.0));

        assert_eq!(rc.tile_size, 20);
        assert_eq!(rc.walkable_radius, 2);
        assert_eq!(rc.border_size, 5);
        assert_eq!(rc.width, 30);
        assert_eq!(rc.height, 30);
        assert_eq!(rc.walkable_height, 8);
        assert_eq!(rc.walkable_climb, 3);
        assert_eq!(rc.max_edge_len, 24);
        assert_eq!(rc.min_region_area, 16);
        assert_eq!(rc.merge_region_area, 100);
        assert_eq!(rc.detail_sample_dist, 3.0);
        assert_eq!(rc.detail_sample_max_error, 0.5);
        assert_eq!(rc.bmin, Vec3::new(-2.5, 0.0, -2.5));
        assert_eq!(rc.bmax, Vec3::new(12.5, 1.0, 12.5));
        assert!(rc.validate().is_ok());
    }

    #[test]
    fn test_small_detail_distance_disables_sampling() {
        let config = TileCacheConfig::new().with_detail(0.5, 1.0);
        let rc = config.recast_config(Vec3::ZERO, Vec3::ONE);
        assert_eq!(rc.detail_sample_dist, 0.0);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(TileCacheConfig::new().with_tile_size(0.1).validate().is_err());
        assert!(TileCacheConfig::new().with_verts_per_poly(7).validate().is_err());
        assert!(TileCacheConfig::new().with_tris_per_chunk(0).validate().is_err());
        assert!(TileCacheConfig::new().with_max_obstacles(0).validate().is_err());
        assert!(TileCacheConfig::new()
            .with_cell_size(f32::NAN, 0.2)
            .validate()
            .is_err());

        let mut config = TileCacheConfig::new();
        config.convex_volumes.push(ConvexVolume {
            verts: vec![[0.0; 3], [1.0, 0.0, 0.0]],
            hmin: 0.0,
            hmax: 1.0,
            area: 0,
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
