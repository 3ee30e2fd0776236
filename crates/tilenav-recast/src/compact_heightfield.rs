//! Compact heightfield: the open space above walkable spans, with neighbour links

use glam::Vec3;

use tilenav_common::Result;

use crate::heightfield::{dir_offset_x, dir_offset_z, Heightfield, NULL_AREA};

/// Marker for a missing neighbour connection
pub const NOT_CONNECTED: u8 = 0x3f;
/// Flag set on region ids belonging to the tile border
pub const BORDER_REG: u16 = 0x8000;

const MAX_HEIGHT: i32 = 0xffff;
const MAX_LAYERS: usize = NOT_CONNECTED as usize;

/// Location of a column's spans in the span array
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    pub index: u32,
    pub count: u32,
}

/// Open space above a walkable solid span
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor of the open space
    pub y: u16,
    /// Region id
    pub reg: u16,
    /// Per direction layer index of the connected neighbour span
    pub con: [u8; 4],
    /// Height of the open space
    pub h: u8,
}

impl CompactSpan {
    /// Layer index of the neighbour in `dir`, if connected
    #[inline]
    pub fn connection(&self, dir: usize) -> Option<usize> {
        let c = self.con[dir & 3];
        (c != NOT_CONNECTED).then_some(c as usize)
    }
}

/// Compact representation of the walkable surfaces of a heightfield
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub border_size: i32,
    pub max_distance: u16,
    pub max_regions: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest boundary, filled by the distance field pass
    pub dist: Vec<u16>,
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds the compact heightfield from the walkable spans of `hf`
    pub fn build(walkable_height: i32, walkable_climb: i32, hf: &Heightfield) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut bmax = hf.bmax;
        bmax.y += walkable_height as f32 * hf.ch;

        let mut chf = Self {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax,
            cs: hf.cs,
            ch: hf.ch,
            cells: vec![CompactCell::default(); (w * h) as usize],
            spans: Vec::with_capacity(span_count),
            dist: Vec::new(),
            areas: Vec::with_capacity(span_count),
        };

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = chf.spans.len() as u32;
                for (i, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.max as i32;
                    let top = column.get(i + 1).map_or(MAX_HEIGHT, |s| s.min as i32);
                    chf.spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: [NOT_CONNECTED; 4],
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    chf.areas.push(span.area);
                    cell.count += 1;
                }
            }
        }

        let mut too_many_layers = 0;
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let span = chf.spans[i];
                    for dir in 0..4 {
                        let nx = x + dir_offset_x(dir);
                        let nz = z + dir_offset_z(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let ncell = chf.cells[(nx + nz * w) as usize];
                        for k in ncell.index as usize..(ncell.index + ncell.count) as usize {
                            let ns = &chf.spans[k];
                            let bot = (span.y as i32).max(ns.y as i32);
                            let top = (span.y as i32 + span.h as i32).min(ns.y as i32 + ns.h as i32);

                            if top - bot >= walkable_height
                                && (ns.y as i32 - span.y as i32).abs() <= walkable_climb
                            {
                                let layer = k - ncell.index as usize;
                                if layer >= MAX_LAYERS {
                                    too_many_layers = too_many_layers.max(layer);
                                    continue;
                                }
                                chf.spans[i].con[dir] = layer as u8;
                                break;
                            }
                        }
                    }
                }
            }
        }

        if too_many_layers > 0 {
            log::warn!(
                "Heightfield has too many layers {} (max: {})",
                too_many_layers,
                MAX_LAYERS
            );
        }

        Ok(chf)
    }

    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index of the span connected to span `i` of cell (x, z) in `dir`
    #[inline]
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let layer = self.spans[i].connection(dir)?;
        let cell = self.cell(x + dir_offset_x(dir), z + dir_offset_z(dir));
        Some(cell.index as usize + layer)
    }

    /// Iterates the span indices of every cell as `(x, z, span)`
    pub fn iter_spans(&self) -> impl Iterator<Item = (i32, i32, usize)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).flat_map(move |x| {
                let cell = self.cell(x, z);
                (cell.index as usize..(cell.index + cell.count) as usize).map(move |i| (x, z, i))
            })
        })
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, 1.0, h as f32),
            1.0,
            0.1,
        );
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        hf
    }

    #[test]
    fn test_build_connections() {
        let hf = flat_field(3, 3);
        let chf = CompactHeightfield::build(10, 2, &hf).unwrap();
        assert_eq!(chf.span_count(), 9);
        assert!((chf.bmax.y - 2.0).abs() < 1e-5);

        let centre = chf.cell(1, 1).index as usize;
        for dir in 0..4 {
            assert!(chf.spans[centre].connection(dir).is_some());
        }
        let corner = chf.cell(0, 0).index as usize;
        assert!(chf.neighbour(0, 0, corner, 0).is_none());
        assert_eq!(chf.neighbour(0, 0, corner, 2), Some(chf.cell(1, 0).index as usize));
        assert_eq!(chf.neighbour(0, 0, corner, 1), Some(chf.cell(0, 1).index as usize));
    }

    #[test]
    fn test_unwalkable_spans_are_dropped() {
        let mut hf2 = Heightfield::new(2, 1, Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0), 1.0, 0.1);
        hf2.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf2.add_span(1, 0, 0, 2, NULL_AREA, 1);
        let chf = CompactHeightfield::build(10, 2, &hf2).unwrap();
        assert_eq!(chf.span_count(), 1);
        assert_eq!(chf.cell(1, 0).count, 0);
        assert_eq!(chf.iter_spans().count(), 1);
    }

    #[test]
    fn test_climb_limits_connections() {
        let mut hf = Heightfield::new(2, 1, Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0), 1.0, 0.1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(1, 0, 0, 6, WALKABLE_AREA, 1);
        let chf = CompactHeightfield::build(10, 3, &hf).unwrap();
        assert!(chf.spans[0].connection(2).is_none());

        let chf = CompactHeightfield::build(10, 4, &hf).unwrap();
        assert_eq!(chf.spans[0].connection(2), Some(0));
    }

    #[test]
    fn test_clearance_limits_connections() {
        let mut hf = Heightfield::new(2, 1, Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0), 1.0, 0.1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(1, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(1, 0, 8, 9, NULL_AREA, 1);
        let chf = CompactHeightfield::build(10, 1, &hf).unwrap();
        assert_eq!(chf.spans[1].h, 6);
        assert!(chf.spans[0].connection(2).is_none());
    }
}
