//! End-to-end scenarios over small flat meshes

use std::thread;

use glam::Vec3;
use tilenav_common::Error;
use tilenav_recast::{TriMesh, NULL_AREA};

use crate::nav_mesh::NavPoly;
use crate::obstacle::ObstacleVolume;
use crate::tile_cache::TileCache;
use crate::tile_grid::{TileCoord, TileSide};
use crate::TileCacheConfig;

fn quad_mesh(size: f32) -> TriMesh {
    TriMesh::new(
        vec![
            [0.0, 0.0, 0.0],
            [0.0, 0.0, size],
            [size, 0.0, size],
            [size, 0.0, 0.0],
        ],
        vec![[0, 1, 2], [0, 2, 3]],
    )
}

/// No agent radius and no ledge filter, so the mesh rim is not eroded
fn flat_config() -> TileCacheConfig {
    TileCacheConfig::new()
        .with_cell_size(0.5, 0.2)
        .with_tile_size(10.0)
        .with_agent(0.0, 2.0, 0.9, 45.0)
        .with_filters(true, false, true)
}

fn built_cache(size: f32) -> TileCache {
    let mut cache = TileCache::from_mesh(quad_mesh(size), flat_config()).unwrap();
    let report = cache.build_all();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    cache
}

fn tile_geometry(cache: &TileCache, coord: TileCoord) -> Option<(Vec<Vec3>, Vec<NavPoly>)> {
    let nav_mesh = cache.nav_mesh();
    let nav_mesh = nav_mesh.read().unwrap();
    nav_mesh
        .tile(coord)
        .map(|t| (t.verts.clone(), t.polys.clone()))
}

fn poly_count(cache: &TileCache, coord: TileCoord) -> usize {
    cache
        .nav_mesh()
        .read()
        .unwrap()
        .tile(coord)
        .map_or(0, |t| t.poly_count())
}

#[test]
fn test_flat_quad_builds_one_polygon_per_tile() {
    let mut cache = TileCache::from_mesh(quad_mesh(20.0), flat_config()).unwrap();
    assert_eq!(cache.grid().width(), 2);
    assert_eq!(cache.grid().height(), 2);

    let report = cache.build_all();
    assert_eq!(report.built.len(), 4);
    assert!(report.failed.is_empty());
    assert_eq!(report.layer_count, 4);
    assert!(report.compressed_bytes > 0);
    assert!(report.compressed_bytes < report.raw_bytes);

    for coord in cache.grid().coords() {
        let outcome = cache.build_tile(coord).unwrap();
        assert_eq!(outcome.stats.region_count, 1, "tile {coord}");
        assert_eq!(outcome.stats.poly_count, 1, "tile {coord}");
    }

    let config = cache.config().clone();
    let tolerance = config.edge_max_error * config.cell_size;
    let nav_mesh = cache.nav_mesh();
    let nav_mesh = nav_mesh.read().unwrap();
    assert_eq!(nav_mesh.tile_count(), 4);
    assert_eq!(nav_mesh.poly_count(), 4);

    for coord in cache.grid().coords() {
        let tile = nav_mesh.tile(coord).unwrap();
        assert_eq!(tile.poly_count(), 1, "tile {coord}");
        assert!((tile.walkable_area() - 100.0).abs() < 1e-2, "tile {coord}");

        let footprint = cache.grid().tile_footprint(coord);
        let corners = [
            (footprint.min[0], footprint.min[1]),
            (footprint.min[0], footprint.max[1]),
            (footprint.max[0], footprint.max[1]),
            (footprint.max[0], footprint.min[1]),
        ];
        for &v in &tile.polys[0].verts {
            let p = tile.verts[v as usize];
            assert!(
                corners
                    .iter()
                    .any(|&(x, z)| (p.x - x).abs() <= tolerance && (p.z - z).abs() <= tolerance),
                "tile {coord} vertex {p:?} is not a footprint corner"
            );
        }
    }

    // Four shared borders, linked in both directions
    assert_eq!(nav_mesh.link_count(), 8);
    let links = nav_mesh.neighbour_links(TileCoord::new(0, 0), TileSide::XMax);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].target.tile, TileCoord::new(1, 0));
}

#[test]
fn test_border_obstacle_splits_polygons() {
    let mut cache = built_cache(20.0);
    let obstacle = ObstacleVolume::cylinder([10.0, -1.0, 5.0], 2.0, 4.0, NULL_AREA).unwrap();

    let handle = cache.add_obstacle(obstacle.clone()).unwrap();
    assert_eq!(
        cache.dirty_tiles(),
        vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]
    );
    // Nothing is rebuilt before update.
    assert_eq!(poly_count(&cache, TileCoord::new(0, 0)), 1);

    let report = cache.update();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.rebuilt, vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]);
    assert!(cache.dirty_tiles().is_empty());

    assert!(poly_count(&cache, TileCoord::new(0, 0)) >= 2);
    assert!(poly_count(&cache, TileCoord::new(1, 0)) >= 2);
    assert_eq!(poly_count(&cache, TileCoord::new(0, 1)), 1);
    assert_eq!(poly_count(&cache, TileCoord::new(1, 1)), 1);

    {
        let nav_mesh = cache.nav_mesh();
        let nav_mesh = nav_mesh.read().unwrap();
        // The portal on either side of the obstacle still links the tiles
        assert!(nav_mesh.neighbour_links(TileCoord::new(0, 0), TileSide::XMax).len() >= 2);
        let tile = nav_mesh.tile(TileCoord::new(0, 0)).unwrap();
        assert!(tile.walkable_area() < 100.0 - 4.0);
    }

    assert_eq!(cache.obstacle(handle), Some(&obstacle));
}

#[test]
fn test_wall_obstacle_splits_regions() {
    let mut cache = built_cache(20.0);
    let coord = TileCoord::new(0, 0);
    assert_eq!(cache.build_tile(coord).unwrap().stats.region_count, 1);

    // A wall across the whole tile leaves two disconnected halves.
    cache
        .add_obstacle(ObstacleVolume::box_aabb([4.5, -1.0, -2.0], [5.5, 1.0, 12.0], NULL_AREA).unwrap())
        .unwrap();
    let report = cache.update();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert!(report.rebuilt.contains(&coord));

    let outcome = cache.build_tile(coord).unwrap();
    assert!(outcome.stats.region_count >= 2);
    assert!(outcome.stats.poly_count >= 2);
    assert!(poly_count(&cache, coord) >= 2);
}

#[test]
fn test_add_then_remove_restores_tiles() {
    let mut cache = built_cache(20.0);
    let before: Vec<_> = cache
        .grid()
        .coords()
        .map(|c| tile_geometry(&cache, c))
        .collect();
    let links_before = cache.nav_mesh().read().unwrap().link_count();

    let handle = cache
        .add_obstacle(ObstacleVolume::box_aabb([3.0, -1.0, 8.0], [6.0, 1.0, 12.0], NULL_AREA).unwrap())
        .unwrap();
    cache.update();
    assert_ne!(tile_geometry(&cache, TileCoord::new(0, 0)), before[0]);

    cache.remove_obstacle(handle).unwrap();
    let report = cache.update();
    assert!(report.failed.is_empty());

    let after: Vec<_> = cache
        .grid()
        .coords()
        .map(|c| tile_geometry(&cache, c))
        .collect();
    assert_eq!(after, before);
    assert_eq!(cache.nav_mesh().read().unwrap().link_count(), links_before);
}

#[test]
fn test_rebuilding_a_tile_is_idempotent() {
    let cache = built_cache(20.0);
    let coord = TileCoord::new(1, 1);
    let before = tile_geometry(&cache, coord);

    let first = cache.build_tile(coord).unwrap();
    let second = cache.build_tile(coord).unwrap();
    assert_eq!(first.stats, second.stats);
    assert_eq!(tile_geometry(&cache, coord), before);

    cache.rebuild_from_layer(coord).unwrap();
    assert_eq!(tile_geometry(&cache, coord), before);
    assert_eq!(cache.nav_mesh().read().unwrap().link_count(), 8);
}

#[test]
fn test_update_rebuilds_exactly_the_touched_tiles() {
    let mut cache = built_cache(40.0);
    let volume = ObstacleVolume::oriented_box([15.0, 0.0, 21.0], [3.0, 1.0, 1.0], 0.6, 5).unwrap();

    let pad = cache.config().border_width();
    let expected: Vec<TileCoord> = cache
        .grid()
        .coords()
        .filter(|&c| volume.overlaps_rect(&cache.grid().tile_rect(c).expanded(pad)))
        .collect();
    assert!(!expected.is_empty());
    assert!(expected.len() < cache.grid().tile_count());
    assert_eq!(cache.tiles_touched_by(&volume), expected);

    cache.add_obstacle(volume).unwrap();
    let report = cache.update();
    assert_eq!(report.processed(), expected);
}

#[test]
fn test_fully_carved_tile_is_removed() {
    let mut cache = built_cache(20.0);
    let carve = ObstacleVolume::box_aabb([-2.0, -1.0, -2.0], [10.0, 1.0, 10.0], NULL_AREA).unwrap();
    cache.add_obstacle(carve).unwrap();

    let report = cache.update();
    let failed: Vec<_> = report.failed.iter().map(|(c, _)| *c).collect();
    assert_eq!(failed, vec![TileCoord::new(0, 0)]);
    assert!(matches!(report.failed[0].1, Error::TileBuild { x: 0, y: 0, .. }));

    // The layer stays stored, the navmesh tile and its links are gone.
    assert!(cache.layer(TileCoord::new(0, 0)).unwrap().is_some());
    let nav_mesh = cache.nav_mesh();
    let nav_mesh = nav_mesh.read().unwrap();
    assert!(nav_mesh.tile(TileCoord::new(0, 0)).is_none());
    assert_eq!(nav_mesh.tile_count(), 3);
    assert!(nav_mesh
        .tiles()
        .flat_map(|t| &t.links)
        .all(|l| l.target.tile != TileCoord::new(0, 0)));
    assert_eq!(nav_mesh.link_count(), 4);
}

#[test]
fn test_empty_layers_are_kept() {
    let mut cache = TileCache::from_mesh(quad_mesh(20.0), flat_config()).unwrap();
    cache
        .add_obstacle(ObstacleVolume::box_aabb([-5.0, -1.0, -5.0], [25.0, 1.0, 25.0], NULL_AREA).unwrap())
        .unwrap();

    let report = cache.build_all();
    assert!(report.built.is_empty());
    assert_eq!(report.failed.len(), 4);
    assert!(report.failed.iter().all(|(_, e)| e.is_tile_local()));
    assert_eq!(report.layer_count, 4);

    let layer = cache.layer(TileCoord::new(1, 1)).unwrap().unwrap();
    assert!(layer.span_count() > 0);
    assert_eq!(layer.walkable_span_count(), 0);
    assert_eq!(cache.nav_mesh().read().unwrap().tile_count(), 0);
}

#[test]
fn test_parallel_tile_builds() {
    let cache = TileCache::from_mesh(quad_mesh(20.0), flat_config()).unwrap();
    let coords: Vec<TileCoord> = cache.grid().coords().collect();

    thread::scope(|scope| {
        for &coord in &coords {
            let cache = &cache;
            scope.spawn(move || cache.build_tile(coord).unwrap());
        }
    });

    let nav_mesh = cache.nav_mesh();
    let nav_mesh = nav_mesh.read().unwrap();
    assert_eq!(nav_mesh.tile_count(), 4);
    assert_eq!(nav_mesh.link_count(), 8);
    assert_eq!(cache.layer_count(), 4);
}

#[test]
fn test_out_of_grid_obstacles_touch_nothing() {
    let mut cache = built_cache(20.0);
    let far = ObstacleVolume::cylinder([100.0, 0.0, 100.0], 1.0, 2.0, NULL_AREA).unwrap();
    cache.add_obstacle(far).unwrap();
    assert!(cache.dirty_tiles().is_empty());
    assert!(cache.update().processed().is_empty());
}

#[cfg(feature = "serialization")]
mod snapshots {
    use std::sync::Arc;

    use tilenav_recast::ChunkyTriMesh;

    use super::*;
    use crate::snapshot::TileCacheSnapshot;

    #[test]
    fn test_restore_from_binary_snapshot() {
        let mut cache = built_cache(20.0);
        let handle = cache
            .add_obstacle(ObstacleVolume::cylinder([15.0, -1.0, 15.0], 1.5, 3.0, NULL_AREA).unwrap())
            .unwrap();
        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.layers.len(), 4);
        assert_eq!(snapshot.dirty, vec![TileCoord::new(1, 1)]);

        let bytes = snapshot.to_binary_bytes().unwrap();
        let decoded = TileCacheSnapshot::from_binary_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let mut restored = TileCache::restore(Arc::clone(cache.index()), decoded).unwrap();
        assert_eq!(restored.dirty_tiles(), vec![TileCoord::new(1, 1)]);
        assert_eq!(restored.obstacle_count(), 1);
        assert!(restored.obstacle(handle).is_some());
        for coord in cache.grid().coords() {
            assert_eq!(tile_geometry(&restored, coord), tile_geometry(&cache, coord));
        }
        assert_eq!(restored.nav_mesh().read().unwrap().link_count(), 8);

        cache.update();
        restored.update();
        assert_eq!(
            tile_geometry(&restored, TileCoord::new(1, 1)),
            tile_geometry(&cache, TileCoord::new(1, 1))
        );

        // The restored registry keeps handles valid.
        restored.remove_obstacle(handle).unwrap();
        assert_eq!(restored.dirty_tiles(), vec![TileCoord::new(1, 1)]);
    }

    #[test]
    fn test_json_snapshot_file() {
        let cache = built_cache(20.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiles.json");

        let snapshot = cache.snapshot().unwrap();
        snapshot.save_to_json(&path).unwrap();
        let loaded = TileCacheSnapshot::load_from_json(&path).unwrap();
        assert_eq!(loaded.layers, snapshot.layers);
        assert_eq!(loaded.compressed_bytes(), snapshot.compressed_bytes());

        let restored = TileCache::restore(Arc::clone(cache.index()), loaded).unwrap();
        assert_eq!(restored.nav_mesh().read().unwrap().tile_count(), 4);

        let bytes = snapshot.to_json_bytes().unwrap();
        assert!(TileCacheSnapshot::from_json_bytes(&bytes).is_ok());
        assert!(matches!(
            TileCacheSnapshot::from_json_bytes(b"{\"version\": 1}"),
            Err(Error::Snapshot(_))
        ));
        assert!(matches!(
            TileCacheSnapshot::load_from_json(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_snapshot_of_another_mesh_is_rejected() {
        let cache = built_cache(20.0);
        let snapshot = cache.snapshot().unwrap();
        let other = Arc::new(ChunkyTriMesh::build(quad_mesh(40.0), 256).unwrap());
        assert!(matches!(
            TileCache::restore(other, snapshot.clone()),
            Err(Error::Snapshot(_))
        ));

        let mut future = snapshot;
        future.version = 99;
        assert!(matches!(
            TileCache::restore(Arc::clone(cache.index()), future),
            Err(Error::Snapshot(_))
        ));
    }

    #[test]
    fn test_inconsistent_obstacle_state_is_rejected() {
        let mut cache = built_cache(20.0);
        cache
            .add_obstacle(ObstacleVolume::cylinder([5.0, -1.0, 5.0], 1.0, 3.0, NULL_AREA).unwrap())
            .unwrap();
        let snapshot = cache.snapshot().unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&snapshot.to_json_bytes().unwrap()).unwrap();
        json["obstacles"]["active"] = serde_json::json!(0);
        let tampered = serde_json::to_vec(&json).unwrap();
        assert!(matches!(
            TileCacheSnapshot::from_json_bytes(&tampered),
            Err(Error::Snapshot(_))
        ));

        let mut relimited = snapshot;
        relimited.config.max_obstacles = 1;
        assert!(matches!(
            TileCache::restore(Arc::clone(cache.index()), relimited),
            Err(Error::Snapshot(_))
        ));
    }
}
