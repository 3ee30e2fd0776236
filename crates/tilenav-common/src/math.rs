//! Scalar and 2D vector helpers
//!
//! 2D helpers work on the horizontal plane: the `[f32; 2]` and `[f32; 3]`
//! inputs are read as (x, z), the y component being height.

use std::f32::consts::PI;

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Converts degrees to radians
#[inline]
pub fn deg_to_rad(deg: f32) -> f32 {
    deg * PI / 180.0
}

/// Linear interpolation between two values
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Signed doubled area of the xz triangle (a, b, c)
///
/// Positive when the triangle winds clockwise seen from above (+y).
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Squared xz distance from `pt` to segment (p, q)
pub fn dist_pt_seg_sq_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> f32 {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let mut dx = pt[0] - p[0];
    let mut dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = p[0] + t * pqx - pt[0];
    dz = p[2] + t * pqz - pt[2];
    dx * dx + dz * dz
}

/// Even-odd point in polygon test on the xz plane
pub fn point_in_poly_xz(pt: &[f32; 3], verts: &[[f32; 3]]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Computes the axis-aligned bounds of a vertex list
///
/// Returns `None` for an empty list.
pub fn calc_bounds(verts: &[[f32; 3]]) -> Option<([f32; 3], [f32; 3])> {
    let first = verts.first()?;
    let mut bmin = *first;
    let mut bmax = *first;
    for v in &verts[1..] {
        for k in 0..3 {
            bmin[k] = bmin[k].min(v[k]);
            bmax[k] = bmax[k].max(v[k]);
        }
    }
    Some((bmin, bmax))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqr_and_lerp() {
        assert_eq!(sqr(3), 9);
        assert_eq!(sqr(1.5f32), 2.25);
        assert_eq!(lerp(2.0, 4.0, 0.25), 2.5);
    }

    #[test]
    fn test_dist_pt_seg() {
        let p = [0.0, 0.0, 0.0];
        let q = [10.0, 0.0, 0.0];
        assert_eq!(dist_pt_seg_sq_2d(&[5.0, 3.0, 2.0], &p, &q), 4.0);
        assert_eq!(dist_pt_seg_sq_2d(&[-3.0, 0.0, 0.0], &p, &q), 9.0);
    }

    #[test]
    fn test_point_in_poly() {
        let square = [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 4.0],
            [4.0, 0.0, 4.0],
            [4.0, 0.0, 0.0],
        ];
        assert!(point_in_poly_xz(&[2.0, 7.0, 2.0], &square));
        assert!(!point_in_poly_xz(&[5.0, 0.0, 2.0], &square));
    }

    #[test]
    fn test_calc_bounds() {
        assert!(calc_bounds(&[]).is_none());
        let (bmin, bmax) = calc_bounds(&[[1.0, -2.0, 3.0], [-1.0, 4.0, 0.5]]).unwrap();
        assert_eq!(bmin, [-1.0, -2.0, 0.5]);
        assert_eq!(bmax, [1.0, 4.0, 3.0]);
    }
}
