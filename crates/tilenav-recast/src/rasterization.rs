//! Triangle rasterization into a solid heightfield

use tilenav_common::deg_to_rad;

use crate::heightfield::{Heightfield, NULL_AREA, SPAN_MAX_HEIGHT, WALKABLE_AREA};

/// Returns the area id of a triangle: walkable if its up-facing normal is
/// within `walkable_slope_angle` degrees of vertical
pub fn triangle_area(walkable_slope_angle: f32, verts: &[[f32; 3]; 3]) -> u8 {
    let walkable_thr = deg_to_rad(walkable_slope_angle).cos();

    let e0 = [
        verts[1][0] - verts[0][0],
        verts[1][1] - verts[0][1],
        verts[1][2] - verts[0][2],
    ];
    let e1 = [
        verts[2][0] - verts[0][0],
        verts[2][1] - verts[0][1],
        verts[2][2] - verts[0][2],
    ];
    let nx = e0[1] * e1[2] - e0[2] * e1[1];
    let ny = e0[2] * e1[0] - e0[0] * e1[2];
    let nz = e0[0] * e1[1] - e0[1] * e1[0];
    let len = (nx * nx + ny * ny + nz * nz).sqrt();
    if len <= f32::EPSILON {
        return NULL_AREA;
    }

    if ny / len > walkable_thr {
        WALKABLE_AREA
    } else {
        NULL_AREA
    }
}

/// Computes the area id of every listed triangle
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    vertices: &[[f32; 3]],
    triangles: &[[u32; 3]],
    tri_ids: &[u32],
) -> Vec<u8> {
    tri_ids
        .iter()
        .map(|&id| {
            let t = triangles[id as usize];
            let verts = [
                vertices[t[0] as usize],
                vertices[t[1] as usize],
                vertices[t[2] as usize],
            ];
            triangle_area(walkable_slope_angle, &verts)
        })
        .collect()
}

/// Rasterizes the listed triangles, using `areas[i]` for `tri_ids[i]`
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    vertices: &[[f32; 3]],
    triangles: &[[u32; 3]],
    tri_ids: &[u32],
    areas: &[u8],
    flag_merge_threshold: i32,
) {
    for (&id, &area) in tri_ids.iter().zip(areas) {
        let t = triangles[id as usize];
        rasterize_triangle(
            hf,
            &vertices[t[0] as usize],
            &vertices[t[1] as usize],
            &vertices[t[2] as usize],
            area,
            flag_merge_threshold,
        );
    }
}

/// Rasterizes one triangle, adding a span for every cell its clipped
/// polygon covers
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: &[f32; 3],
    v1: &[f32; 3],
    v2: &[f32; 3],
    area: u8,
    flag_merge_threshold: i32,
) {
    let bmin = hf.bmin;
    let bmax = hf.bmax;
    let cs = hf.cs;
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;
    let w = hf.width;
    let h = hf.height;
    let by = bmax.y - bmin.y;

    let mut tmin = *v0;
    let mut tmax = *v0;
    for v in [v1, v2] {
        for k in 0..3 {
            tmin[k] = tmin[k].min(v[k]);
            tmax[k] = tmax[k].max(v[k]);
        }
    }

    // Skip triangles entirely outside the heightfield bounds.
    if tmin[0] > bmax.x
        || tmax[0] < bmin.x
        || tmin[1] > bmax.y
        || tmax[1] < bmin.y
        || tmin[2] > bmax.z
        || tmax[2] < bmin.z
    {
        return;
    }

    let z0 = (((tmin[2] - bmin.z) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tmax[2] - bmin.z) * ics) as i32).clamp(0, h - 1);

    let mut input: Vec<[f32; 3]> = vec![*v0, *v1, *v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cz = bmin.z + z as f32 * cs;
        divide_poly(&input, &mut row, &mut rest, cz + cs, 2);
        std::mem::swap(&mut input, &mut rest);

        if row.len() < 3 || z < 0 {
            continue;
        }

        let mut min_x = row[0][0];
        let mut max_x = row[0][0];
        for v in &row[1..] {
            min_x = min_x.min(v[0]);
            max_x = max_x.max(v[0]);
        }
        let x0 = ((min_x - bmin.x) * ics) as i32;
        let x1 = ((max_x - bmin.x) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        let mut remaining = row.clone();
        for x in x0..=x1 {
            let cx = bmin.x + x as f32 * cs;
            divide_poly(&remaining, &mut cell, &mut row_rest, cx + cs, 0);
            std::mem::swap(&mut remaining, &mut row_rest);

            if cell.len() < 3 || x < 0 {
                continue;
            }

            let mut smin = cell[0][1];
            let mut smax = cell[0][1];
            for v in &cell[1..] {
                smin = smin.min(v[1]);
                smax = smax.max(v[1]);
            }
            smin -= bmin.y;
            smax -= bmin.y;

            if smax < 0.0 || smin > by {
                continue;
            }
            let smin = smin.max(0.0);
            let smax = smax.min(by);

            let max_height = SPAN_MAX_HEIGHT as i32;
            let ismin = ((smin * ich).floor() as i32).clamp(0, max_height);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, max_height);

            hf.add_span(
                x,
                z,
                ismin as u16,
                ismax as u16,
                area,
                flag_merge_threshold,
            );
        }
    }
}

/// Splits a convex polygon along `axis` at `x`
///
/// `below` receives the part with coordinates less than `x`, `above` the rest.
fn divide_poly(
    input: &[[f32; 3]],
    below: &mut Vec<[f32; 3]>,
    above: &mut Vec<[f32; 3]>,
    x: f32,
    axis: usize,
) {
    below.clear();
    above.clear();
    if input.is_empty() {
        return;
    }

    let n = input.len();
    let d: Vec<f32> = input.iter().map(|v| x - v[axis]).collect();

    let mut j = n - 1;
    for i in 0..n {
        let ina = d[j] >= 0.0;
        let inb = d[i] >= 0.0;
        if ina != inb {
            let s = d[j] / (d[j] - d[i]);
            let v = [
                input[j][0] + (input[i][0] - input[j][0]) * s,
                input[j][1] + (input[i][1] - input[j][1]) * s,
                input[j][2] + (input[i][2] - input[j][2]) * s,
            ];
            below.push(v);
            above.push(v);
            // Points on the dividing line were already added above.
            if d[i] > 0.0 {
                below.push(input[i]);
            } else if d[i] < 0.0 {
                above.push(input[i]);
            }
        } else {
            if d[i] >= 0.0 {
                below.push(input[i]);
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(input[i]);
        }
        j = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_triangle_area_slope() {
        let flat = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        assert_eq!(triangle_area(45.0, &flat), WALKABLE_AREA);

        // Same triangle wound the other way faces down.
        let down = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(triangle_area(45.0, &down), NULL_AREA);

        // 60 degree slope.
        let steep = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 3f32.sqrt(), 0.0]];
        assert_eq!(triangle_area(45.0, &steep), NULL_AREA);
        assert_eq!(triangle_area(70.0, &steep), WALKABLE_AREA);

        let degenerate = [[0.0; 3], [1.0, 0.0, 1.0], [2.0, 0.0, 2.0]];
        assert_eq!(triangle_area(89.0, &degenerate), NULL_AREA);
    }

    #[test]
    fn test_divide_poly() {
        let square = [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 2.0],
            [2.0, 0.0, 2.0],
            [2.0, 0.0, 0.0],
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&square, &mut below, &mut above, 1.0, 0);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v[0] <= 1.0));
        assert!(above.iter().all(|v| v[0] >= 1.0));
    }

    #[test]
    fn test_rasterize_flat_quad() {
        let mut hf = Heightfield::new(
            4,
            4,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 2.0),
            0.5,
            0.1,
        );
        let vertices = [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 2.0],
            [2.0, 0.0, 2.0],
            [2.0, 0.0, 0.0],
        ];
        let triangles = [[0, 1, 2], [0, 2, 3]];
        let areas = mark_walkable_triangles(45.0, &vertices, &triangles, &[0, 1]);
        assert_eq!(areas, vec![WALKABLE_AREA; 2]);

        rasterize_triangles(&mut hf, &vertices, &triangles, &[0, 1], &areas, 1);
        for z in 0..4 {
            for x in 0..4 {
                let column = hf.column(x, z);
                assert_eq!(column.len(), 1, "cell ({x}, {z})");
                assert_eq!((column[0].min, column[0].max), (0, 1));
                assert_eq!(column[0].area, WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_rasterize_clips_to_bounds() {
        let mut hf = Heightfield::new(
            2,
            2,
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(2.0, 1.0, 2.0),
            0.5,
            0.25,
        );
        rasterize_triangle(
            &mut hf,
            &[0.0, 0.5, 0.0],
            &[0.0, 0.5, 4.0],
            &[4.0, 0.5, 0.0],
            WALKABLE_AREA,
            1,
        );
        // The hypotenuse x + z = 4 passes beyond the heightfield, so every
        // cell is covered.
        assert_eq!(hf.span_count(), 4);
        assert!(hf.columns().iter().flatten().all(|s| (s.min, s.max) == (2, 3)));
    }

    #[test]
    fn test_rasterize_skips_outside() {
        let mut hf = Heightfield::new(2, 2, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0), 0.5, 0.1);
        rasterize_triangle(
            &mut hf,
            &[5.0, 0.0, 5.0],
            &[5.0, 0.0, 6.0],
            &[6.0, 0.0, 5.0],
            WALKABLE_AREA,
            1,
        );
        assert_eq!(hf.span_count(), 0);
    }
}
