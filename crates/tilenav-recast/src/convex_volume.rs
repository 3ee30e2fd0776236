//! Convex volumes that relabel or carve out walkable area

use std::f32::consts::TAU;

use tilenav_common::{convex_poly_overlaps_rect, point_in_poly_xz, tri_area_2d, Error, Rect, Result};

/// Maximum number of footprint vertices of a convex volume
pub const MAX_CONVEX_VOLUME_VERTS: usize = 12;

const CYLINDER_SEGMENTS: usize = MAX_CONVEX_VOLUME_VERTS;

/// A vertical prism with a convex xz footprint
///
/// Spans whose top lies within `hmin..=hmax` and whose cell centre falls
/// inside the footprint take the volume's area id. Area id 0 carves a hole.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ConvexVolume {
    pub verts: Vec<[f32; 3]>,
    pub hmin: f32,
    pub hmax: f32,
    pub area: u8,
}

impl ConvexVolume {
    /// Creates a volume from a convex footprint, in either winding
    pub fn polygon(verts: Vec<[f32; 3]>, hmin: f32, hmax: f32, area: u8) -> Result<Self> {
        let volume = Self {
            verts,
            hmin,
            hmax,
            area,
        };
        volume.validate()?;
        Ok(volume)
    }

    /// Upright cylinder standing on `base`, approximated by a 12-gon
    pub fn cylinder(base: [f32; 3], radius: f32, height: f32, area: u8) -> Result<Self> {
        if !(radius > 0.0) {
            return Err(Error::InvalidObstacle(format!(
                "cylinder radius must be positive, got {radius}"
            )));
        }
        let verts = (0..CYLINDER_SEGMENTS)
            .map(|i| {
                let a = i as f32 / CYLINDER_SEGMENTS as f32 * TAU;
                [
                    base[0] + a.cos() * radius,
                    base[1],
                    base[2] + a.sin() * radius,
                ]
            })
            .collect();
        Self::polygon(verts, base[1], base[1] + height, area)
    }

    /// Axis-aligned box
    pub fn box_aabb(bmin: [f32; 3], bmax: [f32; 3], area: u8) -> Result<Self> {
        let verts = vec![
            [bmin[0], bmin[1], bmin[2]],
            [bmin[0], bmin[1], bmax[2]],
            [bmax[0], bmin[1], bmax[2]],
            [bmax[0], bmin[1], bmin[2]],
        ];
        Self::polygon(verts, bmin[1], bmax[1], area)
    }

    /// Box rotated about the y axis by `y_rotation` radians
    pub fn oriented_box(
        center: [f32; 3],
        half_extents: [f32; 3],
        y_rotation: f32,
        area: u8,
    ) -> Result<Self> {
        let (sin, cos) = y_rotation.sin_cos();
        let [hx, hy, hz] = half_extents;
        let verts = [(-hx, -hz), (-hx, hz), (hx, hz), (hx, -hz)]
            .iter()
            .map(|&(x, z)| {
                [
                    center[0] + x * cos - z * sin,
                    center[1] - hy,
                    center[2] + x * sin + z * cos,
                ]
            })
            .collect();
        Self::polygon(verts, center[1] - hy, center[1] + hy, area)
    }

    /// Checks vertex count, finiteness, height range and convexity
    pub fn validate(&self) -> Result<()> {
        let n = self.verts.len();
        if !(3..=MAX_CONVEX_VOLUME_VERTS).contains(&n) {
            return Err(Error::InvalidObstacle(format!(
                "footprint needs 3..={MAX_CONVEX_VOLUME_VERTS} vertices, got {n}"
            )));
        }
        let finite = self.verts.iter().flatten().all(|c| c.is_finite())
            && self.hmin.is_finite()
            && self.hmax.is_finite();
        if !finite {
            return Err(Error::InvalidObstacle(
                "non-finite coordinate".to_string(),
            ));
        }
        if self.hmin > self.hmax {
            return Err(Error::InvalidObstacle(format!(
                "height range {}..{} is inverted",
                self.hmin, self.hmax
            )));
        }

        let mut positive = false;
        let mut negative = false;
        for i in 0..n {
            let a = &self.verts[i];
            let b = &self.verts[(i + 1) % n];
            let c = &self.verts[(i + 2) % n];
            let cross = tri_area_2d(a, b, c);
            if cross > 1e-6 {
                positive = true;
            } else if cross < -1e-6 {
                negative = true;
            }
        }
        if positive && negative {
            return Err(Error::InvalidObstacle(
                "footprint is not convex".to_string(),
            ));
        }
        if !positive && !negative {
            return Err(Error::InvalidObstacle(
                "footprint has no area".to_string(),
            ));
        }
        Ok(())
    }

    /// Bounding rectangle of the footprint
    pub fn footprint(&self) -> Rect {
        let mut rect = Rect::empty();
        for v in &self.verts {
            rect.include(v);
        }
        rect
    }

    /// Returns true if the footprint touches `rect`
    pub fn overlaps_rect(&self, rect: &Rect) -> bool {
        convex_poly_overlaps_rect(&self.verts, rect)
    }

    /// Returns true if the xz point is inside the footprint
    pub fn contains_xz(&self, x: f32, z: f32) -> bool {
        point_in_poly_xz(&[x, 0.0, z], &self.verts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cylinder() {
        let volume = ConvexVolume::cylinder([10.0, 0.0, 5.0], 2.0, 3.0, 0).unwrap();
        assert_eq!(volume.verts.len(), MAX_CONVEX_VOLUME_VERTS);
        assert_eq!((volume.hmin, volume.hmax), (0.0, 3.0));
        assert!(volume.contains_xz(10.0, 5.0));
        assert!(volume.contains_xz(11.5, 5.0));
        assert!(!volume.contains_xz(12.5, 5.0));

        let fp = volume.footprint();
        assert!((fp.min[0] - 8.0).abs() < 1e-4);
        assert!((fp.max[1] - 7.0).abs() < 1e-3);
    }

    #[test]
    fn test_oriented_box() {
        let volume = ConvexVolume::oriented_box(
            [0.0, 1.0, 0.0],
            [2.0, 1.0, 0.5],
            std::f32::consts::FRAC_PI_2,
            5,
        )
        .unwrap();
        // Rotated a quarter turn, the long side now runs along z.
        assert!(volume.contains_xz(0.0, 1.8));
        assert!(!volume.contains_xz(1.8, 0.0));
        assert_eq!((volume.hmin, volume.hmax), (0.0, 2.0));
    }

    #[test]
    fn test_accepts_either_winding() {
        let ccw = vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 0.0, 2.0], [0.0, 0.0, 2.0]];
        let cw: Vec<[f32; 3]> = ccw.iter().rev().copied().collect();
        assert!(ConvexVolume::polygon(ccw, 0.0, 1.0, 5).is_ok());
        assert!(ConvexVolume::polygon(cw, 0.0, 1.0, 5).is_ok());
    }

    #[test]
    fn test_rejects_bad_volumes() {
        let concave = vec![
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [1.0, 0.0, 0.5],
            [2.0, 0.0, 2.0],
            [0.0, 0.0, 2.0],
        ];
        assert!(matches!(
            ConvexVolume::polygon(concave, 0.0, 1.0, 0),
            Err(Error::InvalidObstacle(_))
        ));

        let too_many: Vec<[f32; 3]> = (0..13)
            .map(|i| {
                let a = i as f32 / 13.0 * TAU;
                [a.cos(), 0.0, a.sin()]
            })
            .collect();
        assert!(ConvexVolume::polygon(too_many, 0.0, 1.0, 0).is_err());

        assert!(ConvexVolume::box_aabb([0.0, 2.0, 0.0], [1.0, 1.0, 1.0], 0).is_err());
        assert!(ConvexVolume::cylinder([0.0; 3], 0.0, 1.0, 0).is_err());
        assert!(ConvexVolume::polygon(
            vec![[0.0; 3], [1.0, 0.0, 1.0], [2.0, 0.0, 2.0]],
            0.0,
            1.0,
            0
        )
        .is_err());
    }

    #[test]
    fn test_overlaps_rect() {
        let volume = ConvexVolume::cylinder([0.0, 0.0, 0.0], 1.0, 1.0, 0).unwrap();
        assert!(volume.overlaps_rect(&Rect::new([0.5, 0.5], [3.0, 3.0])));
        assert!(!volume.overlaps_rect(&Rect::new([0.8, 0.8], [3.0, 3.0])));
    }
}
