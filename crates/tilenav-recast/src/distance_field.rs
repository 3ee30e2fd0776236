//! Distance to the nearest region boundary, used to order the watershed flood

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{dir_offset_x, dir_offset_z};

/// Computes `chf.dist` and `chf.max_distance`
///
/// Boundary spans (missing neighbours or neighbours of another area) get
/// distance 0; the field is then smoothed with a 3x3 box blur.
pub fn build_distance_field(chf: &mut CompactHeightfield) {
    let n = chf.span_count();
    let mut src = vec![0xffffu16; n];

    for (x, z, i) in chf.iter_spans() {
        let area = chf.areas[i];
        let same_area = (0..4)
            .filter_map(|dir| chf.neighbour(x, z, i, dir))
            .filter(|&ai| chf.areas[ai] == area)
            .count();
        if same_area != 4 {
            src[i] = 0;
        }
    }

    calculate_distance(chf, &mut src);

    chf.max_distance = src.iter().copied().max().unwrap_or(0);
    chf.dist = box_blur(chf, 1, &src);
}

fn calculate_distance(chf: &CompactHeightfield, src: &mut [u16]) {
    let w = chf.width;
    let h = chf.height;

    let relax = |x: i32, z: i32, i: usize, dir: usize, src: &mut [u16]| {
        let Some(ai) = chf.neighbour(x, z, i, dir) else {
            return;
        };
        if src[ai].saturating_add(2) < src[i] {
            src[i] = src[ai] + 2;
        }
        let ax = x + dir_offset_x(dir);
        let az = z + dir_offset_z(dir);
        if let Some(aai) = chf.neighbour(ax, az, ai, (dir + 3) & 3) {
            if src[aai].saturating_add(3) < src[i] {
                src[i] = src[aai] + 3;
            }
        }
    };

    // Pass 1: (-1, 0), (-1, -1), (0, -1), (1, -1)
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                relax(x, z, i, 0, src);
                relax(x, z, i, 3, src);
            }
        }
    }

    // Pass 2: (1, 0), (1, 1), (0, 1), (-1, 1)
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                relax(x, z, i, 2, src);
                relax(x, z, i, 1, src);
            }
        }
    }
}

fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16]) -> Vec<u16> {
    let threshold = threshold * 2;
    let mut dst = vec![0u16; src.len()];

    for (x, z, i) in chf.iter_spans() {
        let cd = src[i];
        if cd <= threshold {
            dst[i] = cd;
            continue;
        }

        let mut d = cd as u32;
        for dir in 0..4 {
            match chf.neighbour(x, z, i, dir) {
                Some(ai) => {
                    d += src[ai] as u32;
                    let ax = x + dir_offset_x(dir);
                    let az = z + dir_offset_z(dir);
                    match chf.neighbour(ax, az, ai, (dir + 1) & 3) {
                        Some(ai2) => d += src[ai2] as u32,
                        None => d += cd as u32,
                    }
                }
                None => d += cd as u32 * 2,
            }
        }
        dst[i] = ((d + 5) / 9) as u16;
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use glam::Vec3;

    fn compact_square(n: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            n,
            n,
            Vec3::ZERO,
            Vec3::new(n as f32, 1.0, n as f32),
            1.0,
            0.1,
        );
        for z in 0..n {
            for x in 0..n {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        CompactHeightfield::build(10, 2, &hf).unwrap()
    }

    #[test]
    fn test_distance_peaks_in_centre() {
        let mut chf = compact_square(11);
        build_distance_field(&mut chf);

        assert_eq!(chf.max_distance, 10);
        let centre = chf.cell(5, 5).index as usize;
        let edge = chf.cell(0, 5).index as usize;
        assert_eq!(chf.dist[edge], 0);
        assert!(chf.dist[centre] >= 8);
        assert!(chf.dist.iter().all(|&d| d <= chf.dist[centre]));
    }

    #[test]
    fn test_area_change_is_boundary() {
        let mut chf = compact_square(9);
        for (x, _, i) in chf.iter_spans().collect::<Vec<_>>() {
            if x >= 5 {
                chf.areas[i] = 3;
            }
        }
        build_distance_field(&mut chf);
        let a = chf.cell(4, 4).index as usize;
        let b = chf.cell(5, 4).index as usize;
        assert_eq!(chf.dist[a], 0);
        assert_eq!(chf.dist[b], 0);
    }
}
