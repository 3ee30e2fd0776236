//! Solid heightfield made of per-column span lists, plus the walkability filters

use glam::Vec3;

use tilenav_common::{Error, Result};

/// Area id of spans that cannot be walked on
pub const NULL_AREA: u8 = 0;
/// Default area id for walkable spans
pub const WALKABLE_AREA: u8 = 63;
/// Largest span height representable in a heightfield
pub const SPAN_MAX_HEIGHT: u16 = 0x1fff;

const MAX_HEIGHT: i32 = 0xffff;

/// Offsets for the four axis-aligned directions: -x, +z, +x, -z
pub const DIR_OFFSETS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSETS[dir & 3].0
}

#[inline]
pub fn dir_offset_z(dir: usize) -> i32 {
    DIR_OFFSETS[dir & 3].1
}

/// A solid vertical interval within a column, in cell-height units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Span {
    /// Bottom of the span
    pub min: u16,
    /// Top of the span, the walkable surface
    pub max: u16,
    /// Area id, [`NULL_AREA`] when unwalkable
    pub area: u8,
}

/// A heightfield of solid spans
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield in cells
    pub width: i32,
    /// Depth of the heightfield in cells
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Cell size on the xz plane
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Spans of each column, sorted bottom-up and never overlapping
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates an empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        let ncols = (width.max(0) as usize) * (height.max(0) as usize);
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); ncols],
        }
    }

    /// Rebuilds a heightfield from stored columns
    pub fn from_columns(
        width: i32,
        height: i32,
        bmin: Vec3,
        bmax: Vec3,
        cs: f32,
        ch: f32,
        columns: Vec<Vec<Span>>,
    ) -> Result<Self> {
        if columns.len() != (width.max(0) as usize) * (height.max(0) as usize) {
            return Err(Error::CorruptLayer(format!(
                "expected {} columns, found {}",
                width * height,
                columns.len()
            )));
        }
        for column in &columns {
            let ordered = column.iter().all(|s| s.min < s.max)
                && column.windows(2).all(|w| w[0].max < w[1].min);
            if !ordered {
                return Err(Error::CorruptLayer(
                    "column spans overlap or are unsorted".to_string(),
                ));
            }
        }
        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns,
        })
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Spans of the column at (x, z)
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[self.column_index(x, z)]
    }

    /// Mutable spans of a column; only the area ids may be changed
    pub(crate) fn column_mut(&mut self, x: i32, z: i32) -> &mut [Span] {
        let idx = self.column_index(x, z);
        &mut self.columns[idx]
    }

    pub fn columns(&self) -> &[Vec<Span>] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Vec<Span>> {
        self.columns
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != NULL_AREA)
            .count()
    }

    /// Inserts a span, merging it with every span it touches
    ///
    /// When the merged tops lie within `flag_merge_threshold`, the more
    /// walkable area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) {
        let idx = self.column_index(x, z);
        let column = &mut self.columns[idx];
        let mut new_span = Span {
            min: smin,
            max: smax,
            area,
        };

        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.min > new_span.max {
                break;
            }
            if cur.max < new_span.min {
                i += 1;
                continue;
            }

            new_span.min = new_span.min.min(cur.min);
            new_span.max = new_span.max.max(cur.max);
            if (new_span.max as i32 - cur.max as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(cur.area);
            }
            column.remove(i);
        }

        column.insert(i, new_span);
    }

    /// Lets unwalkable spans sitting at most `walkable_climb` above a
    /// walkable span inherit its area, so curbs and stair steps stay walkable
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous: Option<(bool, u8, u16)> = None;
            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if let Some((prev_walkable, prev_area, prev_max)) = previous {
                    if !walkable
                        && prev_walkable
                        && (span.max as i32 - prev_max as i32) <= walkable_climb
                    {
                        span.area = prev_area;
                    }
                }
                // The original walkability is carried so the fix cannot
                // propagate across several stacked obstacles.
                previous = Some((walkable, span.area, span.max));
            }
        }
    }

    /// Marks spans adjacent to a drop deeper than `walkable_climb` as
    /// unwalkable. Cells outside the heightfield count as drops.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let w = self.width;
        let h = self.height;
        let mut ledges = Vec::new();

        for z in 0..h {
            for x in 0..w {
                let column = self.column(x, z);
                for (i, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }

                    let bot = span.max as i32;
                    let top = column.get(i + 1).map_or(MAX_HEIGHT, |s| s.min as i32);

                    let mut min_height = MAX_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for (dx, dz) in DIR_OFFSETS {
                        let nx = x + dx;
                        let nz = z + dz;
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            min_height = min_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbour = self.column(nx, nz);

                        // The space below the first neighbour span.
                        let nbot = -walkable_climb;
                        let ntop = neighbour.first().map_or(MAX_HEIGHT, |s| s.min as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_height = min_height.min(nbot - bot);
                        }

                        for (j, ns) in neighbour.iter().enumerate() {
                            let nbot = ns.max as i32;
                            let ntop = neighbour.get(j + 1).map_or(MAX_HEIGHT, |s| s.min as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_height = min_height.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        ledges.push((self.column_index(x, z), i));
                    }
                }
            }
        }

        for (col, i) in ledges {
            self.columns[col][i].area = NULL_AREA;
        }
    }

    /// Marks spans with less than `walkable_height` of free space above as unwalkable
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for i in 0..column.len() {
                let bot = column[i].max as i32;
                let top = column.get(i + 1).map_or(MAX_HEIGHT, |s| s.min as i32);
                if top - bot < walkable_height {
                    column[i].area = NULL_AREA;
                }
            }
        }
    }
}
