//! Voxel-space configuration for the build pipeline

use glam::Vec3;

/// Upper bound on vertices per polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Configuration parameters for navigation mesh generation, in voxel units
#[derive(Debug, Clone)]
pub struct RecastConfig {
    /// The width of the field along the x-axis
    pub width: i32,
    /// The height of the field along the z-axis
    pub height: i32,
    /// The width/depth of a tile in cells, excluding the border
    pub tile_size: i32,
    /// The size of the non-navigable border around the heightfield
    pub border_size: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable
    pub walkable_height: i32,
    /// The maximum ledge height that is considered traversable
    pub walkable_climb: i32,
    /// The distance to erode/shrink the walkable area from obstructions
    pub walkable_radius: i32,

    /// Lets unwalkable spans just above walkable ones become walkable
    pub filter_low_hanging_obstacles: bool,
    /// Marks spans next to drops higher than `walkable_climb` unwalkable
    pub filter_ledge_spans: bool,
    /// Marks spans with less than `walkable_height` clearance unwalkable
    pub filter_walkable_low_height_spans: bool,

    /// The maximum allowed length for contour edges along the border of the mesh
    pub max_edge_len: i32,
    /// The maximum distance a simplified contour's border edges should deviate from the original raw contour
    pub max_simplification_error: f32,
    /// The minimum number of cells allowed to form isolated island areas
    pub min_region_area: i32,
    /// Any regions with a span count smaller than this value will be merged with larger regions if possible
    pub merge_region_area: i32,

    /// The maximum number of vertices allowed for polygons generated during the contour to polygon conversion process
    pub max_vertices_per_polygon: usize,

    /// Sets the sampling distance to use when generating the detail mesh (world units, 0 disables sampling)
    pub detail_sample_dist: f32,
    /// The maximum distance the detail mesh surface should deviate from the heightfield data (world units)
    pub detail_sample_max_error: f32,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
            border_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            filter_low_hanging_obstacles: true,
            filter_ledge_spans: true,
            filter_walkable_low_height_spans: true,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 64,
            merge_region_area: 400,
            max_vertices_per_polygon: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
        }
    }
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size covering them
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs + 0.5) as i32;
        self.height = ((bmax.z - bmin.z) / self.cs + 0.5) as i32;
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> tilenav_common::Result<()> {
        use tilenav_common::Error;

        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid grid size {}x{}",
                self.width, self.height
            )));
        }

        if !(self.cs > 0.0) || !(self.ch > 0.0) {
            return Err(Error::InvalidConfig(
                "cell size and cell height must be positive".to_string(),
            ));
        }

        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidConfig(
                "walkable slope angle must be within 0..=90 degrees".to_string(),
            ));
        }

        if self.walkable_height < 1 || self.walkable_climb < 0 || self.walkable_radius < 0 {
            return Err(Error::InvalidConfig(
                "walkable height must be at least one cell".to_string(),
            ));
        }

        if !(3..=MAX_VERTS_PER_POLY).contains(&self.max_vertices_per_polygon) {
            return Err(Error::InvalidConfig(format!(
                "vertices per polygon must be in 3..={}",
                MAX_VERTS_PER_POLY
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size() {
        let mut config = RecastConfig {
            cs: 0.5,
            ..Default::default()
        };
        config.calculate_grid_size(Vec3::new(0.0, 0.0, 0.0), Vec3::new(20.0, 1.0, 10.0));
        assert_eq!(config.width, 40);
        assert_eq!(config.height, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = RecastConfig::default();
        assert!(config.validate().is_err());

        let mut config = RecastConfig {
            width: 10,
            height: 10,
            ..Default::default()
        };
        config.max_vertices_per_polygon = 2;
        assert!(config.validate().is_err());
    }
}
