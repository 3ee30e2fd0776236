//! Navigation mesh assembled from independently built tiles
//!
//! Each [`NavMeshTile`] owns its polygons and the links leaving it. Tiles
//! are stitched along their shared borders by matching portal edges, and a
//! link only exists while both of its tiles are present.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::tile_grid::{TileCoord, TileSide};

/// Neighbour across one polygon edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyNeighbour {
    /// Solid edge
    None,
    /// Shared with another polygon of the same tile
    Internal(u16),
    /// Lies on a tile border and may link to the adjacent tile
    Portal(TileSide),
}

/// Reference to a polygon of a specific tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolyRef {
    pub tile: TileCoord,
    pub poly: u16,
}

/// Connection from a portal edge to a polygon of a neighbouring tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Source polygon in the owning tile
    pub poly: u16,
    /// Edge of the source polygon
    pub edge: u8,
    pub side: TileSide,
    pub target: PolyRef,
    /// Parametric range of the source edge covered by the target edge
    pub tmin: f32,
    pub tmax: f32,
}

/// A convex navigation polygon
#[derive(Debug, Clone, PartialEq)]
pub struct NavPoly {
    /// Tile vertex indices, counter-clockwise seen from above
    pub verts: Vec<u16>,
    /// Neighbour across edge `i`, the edge from `verts[i]` to `verts[i + 1]`
    pub neighbours: Vec<PolyNeighbour>,
    pub area: u8,
    pub region: u16,
}

/// Detail triangles of one polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetailSubMesh {
    pub vert_base: u32,
    pub vert_count: u32,
    pub tri_base: u32,
    pub tri_count: u32,
}

/// One built tile of the navigation mesh
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavMeshTile {
    pub coord: TileCoord,
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// World space polygon vertices
    pub verts: Vec<Vec3>,
    pub polys: Vec<NavPoly>,
    pub detail_meshes: Vec<DetailSubMesh>,
    pub detail_verts: Vec<Vec3>,
    /// Sub-mesh local vertex indices and edge flags
    pub detail_tris: Vec<[u8; 4]>,
    /// Links to polygons of neighbouring tiles
    pub links: Vec<Link>,
}

impl NavMeshTile {
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    /// World space endpoints of a polygon edge
    pub fn edge(&self, poly: usize, edge: usize) -> (Vec3, Vec3) {
        let verts = &self.polys[poly].verts;
        let a = verts[edge] as usize;
        let b = verts[(edge + 1) % verts.len()] as usize;
        (self.verts[a], self.verts[b])
    }

    /// `(poly, edge)` pairs of every portal edge on `side`
    pub fn portal_edges(&self, side: TileSide) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.polys.iter().enumerate().flat_map(move |(p, poly)| {
            poly.neighbours
                .iter()
                .enumerate()
                .filter(move |(_, n)| **n == PolyNeighbour::Portal(side))
                .map(move |(e, _)| (p, e))
        })
    }

    /// Area of the polygons projected on the xz plane
    pub fn walkable_area(&self) -> f32 {
        self.polys
            .iter()
            .map(|poly| {
                let n = poly.verts.len();
                let mut area = 0.0;
                for i in 0..n {
                    let a = self.verts[poly.verts[i] as usize];
                    let b = self.verts[poly.verts[(i + 1) % n] as usize];
                    area += a.x * b.z - b.x * a.z;
                }
                area.abs() * 0.5
            })
            .sum()
    }

    fn drop_links_to(&mut self, coord: TileCoord) {
        self.links.retain(|l| l.target.tile != coord);
    }
}

/// Tiles of a navigation mesh and the links between them
#[derive(Debug, Clone, Default)]
pub struct NavMesh {
    tiles: BTreeMap<TileCoord, NavMeshTile>,
    /// Maximum distance between matching portal lines and edge overlaps
    border_tolerance: f32,
    /// Largest height step allowed across a portal
    climb_tolerance: f32,
}

impl NavMesh {
    pub fn new(border_tolerance: f32, climb_tolerance: f32) -> Self {
        Self {
            tiles: BTreeMap::new(),
            border_tolerance,
            climb_tolerance,
        }
    }

    /// Adds or replaces the tile at `tile.coord`, returning the replaced tile
    ///
    /// Links of the incoming tile and every link into the old one are
    /// dropped; call [`NavMesh::connect_borders`] to stitch the new tile.
    pub fn insert(&mut self, mut tile: NavMeshTile) -> Option<NavMeshTile> {
        let coord = tile.coord;
        tile.links.clear();
        let old = self.tiles.insert(coord, tile);
        if old.is_some() {
            self.sever(coord);
        }
        old
    }

    /// Removes a tile and every link that references it
    pub fn remove(&mut self, coord: TileCoord) -> Option<NavMeshTile> {
        let tile = self.tiles.remove(&coord)?;
        self.sever(coord);
        Some(tile)
    }

    fn sever(&mut self, coord: TileCoord) {
        for side in TileSide::ALL {
            if let Some(neighbour) = self.tiles.get_mut(&coord.neighbour(side)) {
                neighbour.drop_links_to(coord);
            }
        }
    }

    /// Links the tile at `coord` with each present edge-adjacent tile
    ///
    /// Existing links between each pair are rebuilt, so calling this more
    /// than once never duplicates links. Returns the number of links made.
    pub fn connect_borders(&mut self, coord: TileCoord) -> usize {
        if !self.tiles.contains_key(&coord) {
            return 0;
        }
        let mut created = 0;
        for side in TileSide::ALL {
            let other = coord.neighbour(side);
            if !self.tiles.contains_key(&other) {
                continue;
            }
            for (a, b) in [(coord, other), (other, coord)] {
                if let Some(tile) = self.tiles.get_mut(&a) {
                    tile.drop_links_to(b);
                }
            }

            let (forward, backward) = match (self.tiles.get(&coord), self.tiles.get(&other)) {
                (Some(tile), Some(neighbour)) => self.match_portals(tile, neighbour, side),
                _ => continue,
            };
            created += forward.len() + backward.len();
            if let Some(tile) = self.tiles.get_mut(&coord) {
                tile.links.extend(forward);
            }
            if let Some(neighbour) = self.tiles.get_mut(&other) {
                neighbour.links.extend(backward);
            }
        }
        created
    }

    /// Pairs portal edges of `a` on `side` with those of `b` on the opposite side
    fn match_portals(&self, a: &NavMeshTile, b: &NavMeshTile, side: TileSide) -> (Vec<Link>, Vec<Link>) {
        let tol = self.border_tolerance;
        // (line axis, along axis)
        let (line, along) = if side.is_x_border() { (0, 2) } else { (2, 0) };

        let mut forward = Vec::new();
        let mut backward = Vec::new();
        for (pa, ea) in a.portal_edges(side) {
            let (a0, a1) = a.edge(pa, ea);
            for (pb, eb) in b.portal_edges(side.opposite()) {
                let (b0, b1) = b.edge(pb, eb);

                let same_line = [a1, b0, b1].iter().all(|v| (v[line] - a0[line]).abs() <= tol);
                if !same_line {
                    continue;
                }

                let lo = a0[along].min(a1[along]).max(b0[along].min(b1[along]));
                let hi = a0[along].max(a1[along]).min(b0[along].max(b1[along]));
                if hi - lo <= tol {
                    continue;
                }

                let (Some(ta), Some(tb)) = (
                    edge_params(a0, a1, along, lo, hi),
                    edge_params(b0, b1, along, lo, hi),
                ) else {
                    continue;
                };
                let step_ok = [(ta.0, tb.0), (ta.1, tb.1)].iter().all(|&(sa, sb)| {
                    let ya = a0.y + (a1.y - a0.y) * sa;
                    let yb = b0.y + (b1.y - b0.y) * sb;
                    (ya - yb).abs() <= self.climb_tolerance
                });
                if !step_ok {
                    continue;
                }

                forward.push(Link {
                    poly: pa as u16,
                    edge: ea as u8,
                    side,
                    target: PolyRef {
                        tile: b.coord,
                        poly: pb as u16,
                    },
                    tmin: ta.0.min(ta.1),
                    tmax: ta.0.max(ta.1),
                });
                backward.push(Link {
                    poly: pb as u16,
                    edge: eb as u8,
                    side: side.opposite(),
                    target: PolyRef {
                        tile: a.coord,
                        poly: pa as u16,
                    },
                    tmin: tb.0.min(tb.1),
                    tmax: tb.0.max(tb.1),
                });
            }
        }
        (forward, backward)
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&NavMeshTile> {
        self.tiles.get(&coord)
    }

    /// Tiles in ascending coordinate order
    pub fn tiles(&self) -> impl Iterator<Item = &NavMeshTile> {
        self.tiles.values()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Number of links, counting each direction of a connection
    pub fn link_count(&self) -> usize {
        self.tiles.values().map(|t| t.links.len()).sum()
    }

    pub fn poly_count(&self) -> usize {
        self.tiles.values().map(NavMeshTile::poly_count).sum()
    }

    /// Links leaving the tile at `coord` through `side`
    pub fn neighbour_links(&self, coord: TileCoord, side: TileSide) -> Vec<&Link> {
        self.tiles
            .get(&coord)
            .map(|t| t.links.iter().filter(|l| l.side == side).collect())
            .unwrap_or_default()
    }

    /// Polygon referenced by a link target
    pub fn poly(&self, r: PolyRef) -> Option<&NavPoly> {
        self.tiles.get(&r.tile)?.polys.get(r.poly as usize)
    }
}

/// Parameters along the edge `v0..v1` where its `along` coordinate is `lo` and `hi`
fn edge_params(v0: Vec3, v1: Vec3, along: usize, lo: f32, hi: f32) -> Option<(f32, f32)> {
    let d = v1[along] - v0[along];
    if d.abs() < f32::EPSILON {
        return None;
    }
    Some(((lo - v0[along]) / d, (hi - v0[along]) / d))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single square polygon covering a 10x10 tile with portals on all sides
    fn square_tile(coord: TileCoord, y: f32) -> NavMeshTile {
        let x0 = coord.x as f32 * 10.0;
        let z0 = coord.y as f32 * 10.0;
        NavMeshTile {
            coord,
            bmin: Vec3::new(x0, y, z0),
            bmax: Vec3::new(x0 + 10.0, y, z0 + 10.0),
            verts: vec![
                Vec3::new(x0, y, z0),
                Vec3::new(x0, y, z0 + 10.0),
                Vec3::new(x0 + 10.0, y, z0 + 10.0),
                Vec3::new(x0 + 10.0, y, z0),
            ],
            polys: vec![NavPoly {
                verts: vec![0, 1, 2, 3],
                neighbours: vec![
                    PolyNeighbour::Portal(TileSide::XMin),
                    PolyNeighbour::Portal(TileSide::ZMax),
                    PolyNeighbour::Portal(TileSide::XMax),
                    PolyNeighbour::Portal(TileSide::ZMin),
                ],
                area: 63,
                region: 1,
            }],
            ..Default::default()
        }
    }

    fn mesh() -> NavMesh {
        NavMesh::new(0.1, 0.5)
    }

    #[test]
    fn test_portal_edges_by_side() {
        let tile = square_tile(TileCoord::new(0, 0), 0.0);
        let edges: Vec<_> = tile.portal_edges(TileSide::XMax).collect();
        assert_eq!(edges, vec![(0, 2)]);
        let (a, b) = tile.edge(0, 2);
        assert_eq!(a, Vec3::new(10.0, 0.0, 10.0));
        assert_eq!(b, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(tile.walkable_area(), 100.0);
    }

    #[test]
    fn test_connect_creates_bidirectional_links() {
        let mut nav = mesh();
        let a = TileCoord::new(0, 0);
        let b = TileCoord::new(1, 0);
        nav.insert(square_tile(a, 0.0));
        assert_eq!(nav.connect_borders(a), 0);

        nav.insert(square_tile(b, 0.0));
        assert_eq!(nav.connect_borders(b), 2);
        assert_eq!(nav.link_count(), 2);

        let forward = nav.neighbour_links(a, TileSide::XMax);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].target, PolyRef { tile: b, poly: 0 });
        assert!((forward[0].tmin - 0.0).abs() < 1e-6);
        assert!((forward[0].tmax - 1.0).abs() < 1e-6);

        let backward = nav.neighbour_links(b, TileSide::XMin);
        assert_eq!(backward.len(), 1);
        assert_eq!(backward[0].target.tile, a);
        assert!(nav.poly(backward[0].target).is_some());
    }

    #[test]
    fn test_repeated_connect_never_over_links() {
        let mut nav = mesh();
        for coord in [TileCoord::new(0, 0), TileCoord::new(1, 0), TileCoord::new(0, 1)] {
            nav.insert(square_tile(coord, 0.0));
        }
        for _ in 0..3 {
            nav.connect_borders(TileCoord::new(0, 0));
            nav.connect_borders(TileCoord::new(1, 0));
        }
        assert_eq!(nav.link_count(), 4);
    }

    #[test]
    fn test_remove_and_replace_sever_links() {
        let mut nav = mesh();
        let a = TileCoord::new(0, 0);
        let b = TileCoord::new(0, 1);
        nav.insert(square_tile(a, 0.0));
        nav.insert(square_tile(b, 0.0));
        nav.connect_borders(a);
        assert_eq!(nav.link_count(), 2);

        assert!(nav.insert(square_tile(b, 0.0)).is_some());
        assert!(nav.neighbour_links(a, TileSide::ZMax).is_empty());
        assert_eq!(nav.link_count(), 0);

        nav.connect_borders(b);
        assert_eq!(nav.link_count(), 2);
        let removed = nav.remove(b).unwrap();
        assert_eq!(removed.coord, b);
        assert_eq!(nav.link_count(), 0);
        assert_eq!(nav.tile_count(), 1);
        assert!(nav.remove(b).is_none());
    }

    #[test]
    fn test_height_step_blocks_links() {
        let mut nav = mesh();
        nav.insert(square_tile(TileCoord::new(0, 0), 0.0));
        nav.insert(square_tile(TileCoord::new(1, 0), 2.0));
        assert_eq!(nav.connect_borders(TileCoord::new(0, 0)), 0);
    }

    #[test]
    fn test_partial_overlap() {
        let mut nav = mesh();
        let mut short = square_tile(TileCoord::new(1, 0), 0.0);
        // Pull the shared edge's far end in to z = 4.
        short.verts[1].z = 4.0;
        nav.insert(square_tile(TileCoord::new(0, 0), 0.0));
        nav.insert(short);
        nav.connect_borders(TileCoord::new(0, 0));

        let links = nav.neighbour_links(TileCoord::new(0, 0), TileSide::XMax);
        assert_eq!(links.len(), 1);
        // The source edge runs from z = 10 down to z = 0.
        assert!((links[0].tmin - 0.6).abs() < 1e-5);
        assert!((links[0].tmax - 1.0).abs() < 1e-5);
    }
}
