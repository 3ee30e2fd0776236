//! Tile coordinates and the grid that slices the mesh bounds into tiles

use std::fmt;

use glam::Vec3;
use tilenav_common::{Error, Rect, Result};

/// Border of a tile, numbered like the polygon mesh portal sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum TileSide {
    /// The -x border
    XMin = 0,
    /// The +z border
    ZMax = 1,
    /// The +x border
    XMax = 2,
    /// The -z border
    ZMin = 3,
}

impl TileSide {
    pub const ALL: [TileSide; 4] = [
        TileSide::XMin,
        TileSide::ZMax,
        TileSide::XMax,
        TileSide::ZMin,
    ];

    /// Decodes the side stored in a portal edge
    pub fn from_portal(side: u16) -> Option<Self> {
        match side {
            0 => Some(TileSide::XMin),
            1 => Some(TileSide::ZMax),
            2 => Some(TileSide::XMax),
            3 => Some(TileSide::ZMin),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TileSide::XMin => TileSide::XMax,
            TileSide::ZMax => TileSide::ZMin,
            TileSide::XMax => TileSide::XMin,
            TileSide::ZMin => TileSide::ZMax,
        }
    }

    /// Tile offset of the neighbour across this side
    pub fn offset(self) -> (i32, i32) {
        match self {
            TileSide::XMin => (-1, 0),
            TileSide::ZMax => (0, 1),
            TileSide::XMax => (1, 0),
            TileSide::ZMin => (0, -1),
        }
    }

    /// True for the borders that run along the z axis
    pub fn is_x_border(self) -> bool {
        matches!(self, TileSide::XMin | TileSide::XMax)
    }
}

/// Position of a tile in the grid; `y` counts tiles along the world z axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Coordinate of the tile across `side`
    pub fn neighbour(self, side: TileSide) -> Self {
        let (dx, dy) = side.offset();
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Fixed-size tile grid anchored at the mesh bounding-box minimum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileGrid {
    bmin: [f32; 3],
    bmax: [f32; 3],
    cell_size: f32,
    tile_cells: i32,
    width: i32,
    height: i32,
}

impl TileGrid {
    /// Creates the grid covering `bmin..bmax` with tiles of `tile_cells` cells
    pub fn new(bmin: [f32; 3], bmax: [f32; 3], cell_size: f32, tile_cells: i32) -> Result<Self> {
        if !(cell_size > 0.0) || tile_cells < 1 {
            return Err(Error::InvalidConfig(format!(
                "invalid tile of {tile_cells} cells of size {cell_size}"
            )));
        }
        if (0..3).any(|i| !(bmin[i] <= bmax[i])) {
            return Err(Error::InvalidMesh(format!(
                "inverted bounds {bmin:?}..{bmax:?}"
            )));
        }

        let tile_width = tile_cells as f32 * cell_size;
        let width = (((bmax[0] - bmin[0]) / tile_width).ceil() as i32).max(1);
        let height = (((bmax[2] - bmin[2]) / tile_width).ceil() as i32).max(1);

        Ok(Self {
            bmin,
            bmax,
            cell_size,
            tile_cells,
            width,
            height,
        })
    }

    /// Number of tiles along x
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Number of tiles along z
    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tile_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn tile_cells(&self) -> i32 {
        self.tile_cells
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Tile edge length in world units
    pub fn tile_width(&self) -> f32 {
        self.tile_cells as f32 * self.cell_size
    }

    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        (self.bmin, self.bmax)
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= 0 && coord.y >= 0 && coord.x < self.width && coord.y < self.height
    }

    /// Fails with [`Error::OutOfBounds`] for a coordinate outside the grid
    pub fn check(&self, coord: TileCoord) -> Result<()> {
        if self.contains(coord) {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                x: coord.x,
                y: coord.y,
                width: self.width,
                height: self.height,
            })
        }
    }

    /// All tile coordinates in ascending order
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (0..self.width).flat_map(move |x| (0..self.height).map(move |y| TileCoord::new(x, y)))
    }

    /// Full rectangle of a tile, which may reach past the mesh bounds
    pub fn tile_rect(&self, coord: TileCoord) -> Rect {
        let tw = self.tile_width();
        let min = [
            self.bmin[0] + coord.x as f32 * tw,
            self.bmin[2] + coord.y as f32 * tw,
        ];
        Rect::new(min, [min[0] + tw, min[1] + tw])
    }

    /// 3D bounds of a tile, spanning the mesh height range
    pub fn tile_bounds(&self, coord: TileCoord) -> (Vec3, Vec3) {
        let rect = self.tile_rect(coord);
        (
            Vec3::new(rect.min[0], self.bmin[1], rect.min[1]),
            Vec3::new(rect.max[0], self.bmax[1], rect.max[1]),
        )
    }

    /// Part of the mesh bounds owned by a tile
    ///
    /// Footprints of all tiles partition the mesh bounds.
    pub fn tile_footprint(&self, coord: TileCoord) -> Rect {
        let mut rect = self.tile_rect(coord);
        if coord.x == self.width - 1 {
            rect.max[0] = self.bmax[0];
        }
        if coord.y == self.height - 1 {
            rect.max[1] = self.bmax[2];
        }
        rect.max[0] = rect.max[0].min(self.bmax[0]);
        rect.max[1] = rect.max[1].min(self.bmax[2]);
        rect
    }

    /// Tiles whose rectangle touches `rect`, in ascending order
    pub fn tiles_overlapping(&self, rect: &Rect) -> Vec<TileCoord> {
        let tw = self.tile_width();
        let x0 = ((rect.min[0] - self.bmin[0]) / tw).floor() as i32;
        let x1 = ((rect.max[0] - self.bmin[0]) / tw).floor() as i32;
        let y0 = ((rect.min[1] - self.bmin[2]) / tw).floor() as i32;
        let y1 = ((rect.max[1] - self.bmin[2]) / tw).floor() as i32;
        if x1 < 0 || y1 < 0 || x0 >= self.width || y0 >= self.height {
            return Vec::new();
        }

        let mut tiles = Vec::new();
        for x in x0.max(0)..=x1.min(self.width - 1) {
            for y in y0.max(0)..=y1.min(self.height - 1) {
                tiles.push(TileCoord::new(x, y));
            }
        }
        tiles
    }

    /// Tile owning the world position, or `None` outside the mesh bounds
    pub fn tile_at(&self, x: f32, z: f32) -> Option<TileCoord> {
        if !(x >= self.bmin[0] && x <= self.bmax[0] && z >= self.bmin[2] && z <= self.bmax[2]) {
            return None;
        }
        let tw = self.tile_width();
        let tx = (((x - self.bmin[0]) / tw) as i32).min(self.width - 1);
        let ty = (((z - self.bmin[2]) / tw) as i32).min(self.height - 1);
        Some(TileCoord::new(tx, ty))
    }

    /// True if both grids slice the same bounds into the same tiles
    pub fn matches(&self, other: &TileGrid) -> bool {
        const EPS: f32 = 1e-4;
        self.width == other.width
            && self.height == other.height
            && self.tile_cells == other.tile_cells
            && (self.cell_size - other.cell_size).abs() <= EPS
            && (0..3).all(|i| {
                (self.bmin[i] - other.bmin[i]).abs() <= EPS
                    && (self.bmax[i] - other.bmax[i]).abs() <= EPS
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGrid {
        TileGrid::new([0.0, 0.0, 0.0], [25.0, 2.0, 20.0], 0.5, 20).unwrap()
    }

    #[test]
    fn test_grid_dimensions() {
        let grid = grid();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.tile_count(), 6);
        assert_eq!(grid.tile_width(), 10.0);
        assert_eq!(grid.coords().count(), 6);
    }

    #[test]
    fn test_footprints_partition_bounds() {
        let grid = grid();
        let mut area = 0.0;
        let coords: Vec<_> = grid.coords().collect();
        for (i, &a) in coords.iter().enumerate() {
            let fa = grid.tile_footprint(a);
            area += fa.area();
            for &b in &coords[i + 1..] {
                let fb = grid.tile_footprint(b);
                let ox = fa.max[0].min(fb.max[0]) - fa.min[0].max(fb.min[0]);
                let oz = fa.max[1].min(fb.max[1]) - fa.min[1].max(fb.min[1]);
                assert!(ox <= 0.0 || oz <= 0.0, "{a} and {b} overlap");
            }
        }
        assert!((area - 25.0 * 20.0).abs() < 1e-3);
        assert_eq!(grid.tile_footprint(TileCoord::new(2, 1)).max, [25.0, 20.0]);
    }

    #[test]
    fn test_tile_at() {
        let grid = grid();
        assert_eq!(grid.tile_at(0.0, 0.0), Some(TileCoord::new(0, 0)));
        assert_eq!(grid.tile_at(10.0, 9.9), Some(TileCoord::new(1, 0)));
        assert_eq!(grid.tile_at(25.0, 20.0), Some(TileCoord::new(2, 1)));
        assert_eq!(grid.tile_at(-0.1, 5.0), None);
        assert_eq!(grid.tile_at(5.0, 20.1), None);
    }

    #[test]
    fn test_tiles_overlapping() {
        let grid = grid();
        let tiles = grid.tiles_overlapping(&Rect::new([8.0, 3.0], [12.0, 7.0]));
        assert_eq!(tiles, vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]);

        let all = grid.tiles_overlapping(&Rect::new([-5.0, -5.0], [50.0, 50.0]));
        assert_eq!(all.len(), 6);
        assert!(grid
            .tiles_overlapping(&Rect::new([30.0, 0.0], [40.0, 5.0]))
            .is_empty());
    }

    #[test]
    fn test_check_out_of_bounds() {
        let grid = grid();
        assert!(grid.check(TileCoord::new(2, 1)).is_ok());
        assert!(matches!(
            grid.check(TileCoord::new(3, 0)),
            Err(Error::OutOfBounds {
                x: 3,
                y: 0,
                width: 3,
                height: 2
            })
        ));
        assert!(grid.check(TileCoord::new(0, -1)).is_err());
    }

    #[test]
    fn test_sides() {
        let c = TileCoord::new(1, 1);
        for side in TileSide::ALL {
            assert_eq!(c.neighbour(side).neighbour(side.opposite()), c);
            assert_eq!(TileSide::from_portal(side as u16), Some(side));
        }
        assert_eq!(c.neighbour(TileSide::XMax), TileCoord::new(2, 1));
        assert_eq!(c.neighbour(TileSide::ZMin), TileCoord::new(1, 0));
    }
}
