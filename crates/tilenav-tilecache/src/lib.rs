//! Tiled navigation meshes with runtime obstacles
//!
//! This crate slices a triangle mesh into fixed-size tiles, builds a navmesh
//! tile for each one and stitches the tiles into a single [`NavMesh`].
//! Temporary obstacles can be added or removed at runtime; only the tiles
//! they touch are rebuilt.
//!
//! # Features
//!
//! - **Tile Caching**: Rasterized tile layers are kept lz4-compressed
//! - **Dynamic Obstacles**: Convex polygon, cylinder, box and oriented box obstacles
//! - **Incremental Updates**: Rebuild only the tiles an obstacle change touches
//! - **Atomic Tile Swaps**: Readers of the shared navmesh never see a partial tile
//! - **Snapshots**: Save and restore layers and obstacles (`serialization` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use tilenav_tilecache::{ObstacleVolume, TileCache, TileCacheConfig};
//! use tilenav_recast::TriMesh;
//!
//! let config = TileCacheConfig::new()
//!     .with_cell_size(0.3, 0.2)
//!     .with_tile_size(9.6);
//! let mut cache = TileCache::from_mesh(TriMesh::new(vertices, triangles), config)?;
//! cache.build_all();
//!
//! // Add a cylinder obstacle
//! let handle = cache.add_obstacle(ObstacleVolume::cylinder([10.0, 0.0, 10.0], 1.0, 2.0, 0)?)?;
//!
//! // Rebuild the affected tiles
//! let report = cache.update();
//!
//! // Remove the obstacle later
//! cache.remove_obstacle(handle)?;
//! cache.update();
//!
//! let nav_mesh = cache.nav_mesh();
//! let polys = nav_mesh.read().unwrap().poly_count();
//! ```
//!
//! # Architecture
//!
//! - [`TileCache`]: Owns layers, obstacles and the dirty set; drives rebuilds
//! - [`TileRasterizer`]: Voxelizes the triangles under one tile into a [`TileLayer`]
//! - [`NavMeshTileBuilder`]: Runs regions, contours, polygons and detail meshes
//! - [`NavMesh`]: Assembles tiles and links their border portals
//! - [`TileCacheSnapshot`]: Persisted cache state

pub mod compressor;
pub mod config;
pub mod nav_mesh;
pub mod obstacle;
pub mod snapshot;
pub mod tile_builder;
pub mod tile_cache;
pub mod tile_grid;
pub mod tile_layer;
pub mod tile_rasterizer;

#[cfg(test)]
mod tile_cache_tests;

pub use compressor::*;
pub use config::*;
pub use nav_mesh::*;
pub use obstacle::*;
pub use snapshot::*;
pub use tile_builder::*;
pub use tile_cache::*;
pub use tile_grid::*;
pub use tile_layer::*;
pub use tile_rasterizer::*;
