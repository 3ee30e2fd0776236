//! Horizontal rectangles used for tile footprints and range queries

/// Axis-aligned rectangle on the xz plane
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Rect {
    /// Minimum corner (x, z)
    pub min: [f32; 2],
    /// Maximum corner (x, z)
    pub max: [f32; 2],
}

impl Rect {
    /// Creates a rectangle from its corners
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    /// Creates an empty rectangle that any `include` call will replace
    pub fn empty() -> Self {
        Self {
            min: [f32::MAX; 2],
            max: [f32::MIN; 2],
        }
    }

    /// Creates the xz rectangle of a 3D bounding box
    pub fn from_bounds(bmin: &[f32; 3], bmax: &[f32; 3]) -> Self {
        Self {
            min: [bmin[0], bmin[2]],
            max: [bmax[0], bmax[2]],
        }
    }

    /// Grows the rectangle to include the xz position of `v`
    pub fn include(&mut self, v: &[f32; 3]) {
        self.min[0] = self.min[0].min(v[0]);
        self.min[1] = self.min[1].min(v[2]);
        self.max[0] = self.max[0].max(v[0]);
        self.max[1] = self.max[1].max(v[2]);
    }

    /// Grows the rectangle to include another rectangle
    pub fn include_rect(&mut self, other: &Rect) {
        self.min[0] = self.min[0].min(other.min[0]);
        self.min[1] = self.min[1].min(other.min[1]);
        self.max[0] = self.max[0].max(other.max[0]);
        self.max[1] = self.max[1].max(other.max[1]);
    }

    /// Returns true if the rectangles overlap, touching edges included
    #[inline]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    /// Returns the rectangle grown by `d` on every side
    pub fn expanded(&self, d: f32) -> Rect {
        Rect {
            min: [self.min[0] - d, self.min[1] - d],
            max: [self.max[0] + d, self.max[1] + d],
        }
    }

    /// Returns true if the xz point lies inside or on the border
    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.min[0] && x <= self.max[0] && z >= self.min[1] && z <= self.max[1]
    }

    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn depth(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.depth().max(0.0)
    }
}

/// Separating-axis test between a convex xz polygon and a rectangle
///
/// Touching counts as overlapping, matching [`Rect::overlaps`].
pub fn convex_poly_overlaps_rect(verts: &[[f32; 3]], rect: &Rect) -> bool {
    let mut bounds = Rect::empty();
    for v in verts {
        bounds.include(v);
    }
    if verts.is_empty() || !bounds.overlaps(rect) {
        return false;
    }

    let corners = [
        [rect.min[0], rect.min[1]],
        [rect.max[0], rect.min[1]],
        [rect.max[0], rect.max[1]],
        [rect.min[0], rect.max[1]],
    ];

    // Orientation sign of the polygon, so edge normals point outwards.
    let mut area = 0.0;
    let n = verts.len();
    for i in 0..n {
        let a = &verts[i];
        let b = &verts[(i + 1) % n];
        area += a[0] * b[2] - b[0] * a[2];
    }
    let sign = if area < 0.0 { -1.0 } else { 1.0 };

    for i in 0..n {
        let a = &verts[i];
        let b = &verts[(i + 1) % n];
        let ex = b[0] - a[0];
        let ez = b[2] - a[2];
        let separated = corners.iter().all(|c| {
            let side = ex * (c[1] - a[2]) - ez * (c[0] - a[0]);
            side * sign < 0.0
        });
        if separated {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_rect_overlap() {
        // Diamond centred on (0, 0) with radius 1.
        let diamond = [
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [-1.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
        ];
        assert!(convex_poly_overlaps_rect(
            &diamond,
            &Rect::new([0.5, -0.2], [2.0, 0.2])
        ));
        // Inside the bounding box, outside the diamond.
        assert!(!convex_poly_overlaps_rect(
            &diamond,
            &Rect::new([0.8, 0.8], [2.0, 2.0])
        ));
        assert!(!convex_poly_overlaps_rect(
            &diamond,
            &Rect::new([3.0, 3.0], [4.0, 4.0])
        ));
    }

    #[test]
    fn test_rect_overlap() {
        let a = Rect::new([0.0, 0.0], [10.0, 10.0]);
        let b = Rect::new([10.0, 5.0], [20.0, 8.0]);
        let c = Rect::new([10.5, 5.0], [20.0, 8.0]);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.expanded(0.5).overlaps(&c));
    }

    #[test]
    fn test_rect_include() {
        let mut r = Rect::empty();
        r.include(&[1.0, 100.0, -2.0]);
        r.include(&[-3.0, -100.0, 4.0]);
        assert_eq!(r, Rect::new([-3.0, -2.0], [1.0, 4.0]));
        assert_eq!(r.area(), 24.0);
        assert_eq!(Rect::empty().area(), 0.0);
    }
}
