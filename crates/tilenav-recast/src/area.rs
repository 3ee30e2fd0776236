//! Area marking: erosion by agent radius and convex volume labelling

use tilenav_common::point_in_poly_xz;

use crate::compact_heightfield::CompactHeightfield;
use crate::convex_volume::ConvexVolume;
use crate::heightfield::{dir_offset_x, dir_offset_z, Heightfield, NULL_AREA};

/// Erodes the walkable area by `radius` cells, using a two-pass chamfer
/// distance (2 per straight step, 3 per diagonal step)
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    let n = chf.span_count();
    let mut dist = vec![0xffu8; n];

    // Spans touching an unwalkable or missing neighbour seed the distance.
    for (x, z, i) in chf.iter_spans() {
        if chf.areas[i] == NULL_AREA {
            dist[i] = 0;
            continue;
        }
        let walkable_neighbours = (0..4)
            .filter_map(|dir| chf.neighbour(x, z, i, dir))
            .filter(|&ai| chf.areas[ai] != NULL_AREA)
            .count();
        if walkable_neighbours != 4 {
            dist[i] = 0;
        }
    }

    chamfer_pass(chf, &mut dist, [0, 3], false);
    chamfer_pass(chf, &mut dist, [2, 1], true);

    let threshold = (radius * 2).min(255) as u8;
    for (area, d) in chf.areas.iter_mut().zip(&dist) {
        if *d < threshold {
            *area = NULL_AREA;
        }
    }
}

/// One sweep of the chamfer distance transform over the u8 distances
///
/// `dirs[0]` and `dirs[1]` are the straight neighbours already visited by
/// the sweep; diagonals are reached by turning clockwise from each.
fn chamfer_pass(chf: &CompactHeightfield, dist: &mut [u8], dirs: [usize; 2], reverse: bool) {
    let w = chf.width;
    let h = chf.height;
    let zs: Vec<i32> = if reverse {
        (0..h).rev().collect()
    } else {
        (0..h).collect()
    };
    for z in zs {
        let xs: Vec<i32> = if reverse {
            (0..w).rev().collect()
        } else {
            (0..w).collect()
        };
        for x in xs {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                for dir in dirs {
                    let Some(ai) = chf.neighbour(x, z, i, dir) else {
                        continue;
                    };
                    let nd = dist[ai].saturating_add(2);
                    if nd < dist[i] {
                        dist[i] = nd;
                    }

                    let ax = x + dir_offset_x(dir);
                    let az = z + dir_offset_z(dir);
                    let diag = (dir + 3) & 3;
                    if let Some(aai) = chf.neighbour(ax, az, ai, diag) {
                        let nd = dist[aai].saturating_add(3);
                        if nd < dist[i] {
                            dist[i] = nd;
                        }
                    }
                }
            }
        }
    }
}

/// Applies a convex volume to the walkable spans of a solid heightfield
///
/// A span is relabelled when its cell centre is inside the footprint and
/// its top lies within the volume's height range. Unwalkable spans are
/// left alone, so a volume never creates walkable area.
pub fn mark_convex_poly_area(hf: &mut Heightfield, volume: &ConvexVolume) {
    let footprint = volume.footprint();
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;

    let minx = ((footprint.min[0] - hf.bmin.x) * ics) as i32;
    let maxx = ((footprint.max[0] - hf.bmin.x) * ics) as i32;
    let minz = ((footprint.min[1] - hf.bmin.z) * ics) as i32;
    let maxz = ((footprint.max[1] - hf.bmin.z) * ics) as i32;
    let miny = ((volume.hmin - hf.bmin.y) * ich).floor() as i32;
    let maxy = ((volume.hmax - hf.bmin.y) * ich).ceil() as i32;

    if maxx < 0 || minx >= hf.width || maxz < 0 || minz >= hf.height {
        return;
    }
    let minx = minx.max(0);
    let maxx = maxx.min(hf.width - 1);
    let minz = minz.max(0);
    let maxz = maxz.min(hf.height - 1);

    for z in minz..=maxz {
        for x in minx..=maxx {
            let centre = [
                hf.bmin.x + (x as f32 + 0.5) * hf.cs,
                0.0,
                hf.bmin.z + (z as f32 + 0.5) * hf.cs,
            ];
            if !point_in_poly_xz(&centre, &volume.verts) {
                continue;
            }
            for span in hf.column_mut(x, z) {
                if span.area == NULL_AREA {
                    continue;
                }
                let top = span.max as i32;
                if top >= miny && top <= maxy {
                    span.area = volume.area;
                }
            }
        }
    }
}
