//! Region contours traced from the compact heightfield
//!
//! Each region boundary is walked cell edge by cell edge, then simplified
//! with a max-deviation test and split where wall edges exceed the maximum
//! edge length. Contours wound backwards are holes and get stitched into
//! the outline of their region.

use glam::Vec3;

use tilenav_common::Result;

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::heightfield::{dir_offset_x, dir_offset_z};

/// Flag set on vertices on the tile border that can be removed
pub const BORDER_VERTEX: i32 = 0x10000;
/// Flag set on edges separating two areas
pub const AREA_BORDER: i32 = 0x20000;
/// Mask extracting the neighbour region id from a vertex
pub const CONTOUR_REG_MASK: i32 = 0xffff;

/// A contour vertex in cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContourVertex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Neighbour region id of the following edge plus vertex flags
    pub r: i32,
}

impl ContourVertex {
    pub fn new(x: i32, y: i32, z: i32, r: i32) -> Self {
        Self { x, y, z, r }
    }

    /// Region on the other side of the edge starting at this vertex
    pub fn neighbour_region(&self) -> u16 {
        (self.r & CONTOUR_REG_MASK) as u16
    }
}

/// The simplified and raw outline of a region
#[derive(Debug, Clone)]
pub struct Contour {
    pub verts: Vec<ContourVertex>,
    pub raw_verts: Vec<ContourVertex>,
    pub reg: u16,
    pub area: u8,
}

/// Build flags for contour generation
#[derive(Debug, Clone, Copy)]
pub struct BuildContoursFlags {
    /// Whether to tessellate solid (impassable) edges during contour simplification
    pub tess_wall_edges: bool,
    /// Whether to tessellate edges between areas during contour simplification
    pub tess_area_edges: bool,
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self {
            tess_wall_edges: true,
            tess_area_edges: false,
        }
    }
}

/// A set of contours
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Width excluding the border
    pub width: i32,
    /// Height excluding the border
    pub height: i32,
    /// Bounds with the border removed
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Traces and simplifies the contour of every region of `chf`
    pub fn build(
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        flags: BuildContoursFlags,
    ) -> Result<Self> {
        let w = chf.width;
        let h = chf.height;
        let border_size = chf.border_size;

        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border_size > 0 {
            let pad = border_size as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        let mut cset = ContourSet {
            contours: Vec::with_capacity(chf.max_regions as usize + 8),
            width: w - border_size * 2,
            height: h - border_size * 2,
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            border_size,
            max_error,
        };

        // Mark the edges of each span that do not lead into the same region.
        let mut edge_flags = vec![0u8; chf.span_count()];
        for (x, z, i) in chf.iter_spans() {
            let reg = chf.spans[i].reg;
            if reg == 0 || reg & BORDER_REG != 0 {
                continue;
            }
            let mut connected = 0u8;
            for dir in 0..4 {
                let r = chf.neighbour(x, z, i, dir).map_or(0, |ai| chf.spans[ai].reg);
                if r == reg {
                    connected |= 1 << dir;
                }
            }
            edge_flags[i] = connected ^ 0xf;
        }

        let mut raw = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for (x, z, i) in chf.iter_spans() {
            if edge_flags[i] == 0 || edge_flags[i] == 0xf {
                edge_flags[i] = 0;
                continue;
            }
            let reg = chf.spans[i].reg;
            if reg == 0 || reg & BORDER_REG != 0 {
                continue;
            }
            let area = chf.areas[i];

            raw.clear();
            simplified.clear();

            walk_contour(x, z, i, chf, &mut edge_flags, &mut raw);
            simplify_contour(&raw, &mut simplified, max_error, max_edge_len, flags);
            remove_degenerate_segments(&mut simplified);

            if simplified.len() >= 3 {
                let offset = |v: &ContourVertex| {
                    ContourVertex::new(v.x - border_size, v.y, v.z - border_size, v.r)
                };
                cset.contours.push(Contour {
                    verts: simplified.iter().map(offset).collect(),
                    raw_verts: raw.iter().map(offset).collect(),
                    reg,
                    area,
                });
            }
        }

        merge_holes(&mut cset);

        log::trace!(
            "Built {} contours ({}x{} cells)",
            cset.contours.len(),
            cset.width,
            cset.height
        );

        Ok(cset)
    }
}

fn corner_height(
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
    chf: &CompactHeightfield,
    is_border_vertex: &mut bool,
) -> i32 {
    let s = chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 3;

    // Region and area are combined so vertices between two areas survive.
    let code = |idx: usize| chf.spans[idx].reg as u32 | ((chf.areas[idx] as u32) << 16);
    let mut regs = [0u32; 4];
    regs[0] = code(i);

    if let Some(ai) = chf.neighbour(x, z, i, dir) {
        let ax = x + dir_offset_x(dir);
        let az = z + dir_offset_z(dir);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[1] = code(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }
    if let Some(ai) = chf.neighbour(x, z, i, dirp) {
        let ax = x + dir_offset_x(dirp);
        let az = z + dir_offset_z(dirp);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[3] = code(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }

    // A border vertex has two identical exterior cells in a row followed by
    // two interior cells of the same area.
    let border = BORDER_REG as u32;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 3;
        let c = (j + 2) & 3;
        let d = (j + 3) & 3;

        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            *is_border_vertex = true;
            break;
        }
    }

    ch
}

fn walk_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    chf: &CompactHeightfield,
    flags: &mut [u8],
    points: &mut Vec<ContourVertex>,
) {
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }

    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }

        if flags[i] & (1 << dir) != 0 {
            let mut is_border_vertex = false;
            let mut is_area_border = false;
            let mut px = x;
            let py = corner_height(x, z, i, dir, chf, &mut is_border_vertex);
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0i32;
            if let Some(ai) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as i32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= BORDER_VERTEX;
            }
            if is_area_border {
                r |= AREA_BORDER;
            }
            points.push(ContourVertex::new(px, py, pz, r));

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 3;
        } else {
            let Some(ni) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x += dir_offset_x(dir);
            z += dir_offset_z(dir);
            i = ni;
            dir = (dir + 3) & 3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);

    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Simplified vertices store the index of their raw vertex in `r` until
/// the final pass rewrites it with the raw flags.
fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: i32,
    flags: BuildContoursFlags,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    let has_connections = points.iter().any(|p| p.r & CONTOUR_REG_MASK != 0);
    if has_connections {
        // Add a vertex wherever the neighbouring region changes.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = (points[i].r & CONTOUR_REG_MASK) != (points[ii].r & CONTOUR_REG_MASK);
            let area_borders = (points[i].r & AREA_BORDER) != (points[ii].r & AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(ContourVertex::new(
                    points[i].x,
                    points[i].y,
                    points[i].z,
                    i as i32,
                ));
            }
        }
    }

    if simplified.is_empty() {
        // No connections: seed with the lower-left and upper-right vertices.
        let mut ll = 0;
        let mut ur = 0;
        for (i, p) in points.iter().enumerate() {
            let l = &points[ll];
            if p.x < l.x || (p.x == l.x && p.z < l.z) {
                ll = i;
            }
            let u = &points[ur];
            if p.x > u.x || (p.x == u.x && p.z > u.z) {
                ur = i;
            }
        }
        let l = points[ll];
        let u = points[ur];
        simplified.push(ContourVertex::new(l.x, l.y, l.z, ll as i32));
        simplified.push(ContourVertex::new(u.x, u.y, u.z, ur as i32));
    }

    // Add points until all raw points are within the error of the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let mut ax = simplified[i].x;
        let mut az = simplified[i].z;
        let ai = simplified[i].r as usize;
        let mut bx = simplified[ii].x;
        let mut bz = simplified[ii].z;
        let bi = simplified[ii].r as usize;

        // Traverse in lexicographic order so opposite segments match.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        let mut maxd = 0.0;
        let mut maxi = None;
        // Tessellate only outer edges or edges between areas.
        if points[ci].r & CONTOUR_REG_MASK == 0 || points[ci].r & AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci].x, points[ci].z, ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(m) if maxd > max_error_sq => {
                let p = points[m];
                simplified.insert(i + 1, ContourVertex::new(p.x, p.y, p.z, m as i32));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    if max_edge_len > 0 && (flags.tess_wall_edges || flags.tess_area_edges) {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let ax = simplified[i].x;
            let az = simplified[i].z;
            let ai = simplified[i].r as usize;
            let bx = simplified[ii].x;
            let bz = simplified[ii].z;
            let bi = simplified[ii].r as usize;

            let ci = (ai + 1) % pn;
            let tess = (flags.tess_wall_edges && points[ci].r & CONTOUR_REG_MASK == 0)
                || (flags.tess_area_edges && points[ci].r & AREA_BORDER != 0);

            let mut maxi = None;
            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    // Round based on lexicographic order so the split is
                    // consistent whichever way the segment is traversed.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(m) => {
                    let p = points[m];
                    simplified.insert(i + 1, ContourVertex::new(p.x, p.y, p.z, m as i32));
                }
                None => i += 1,
            }
        }
    }

    for v in simplified.iter_mut() {
        // The edge flag comes from the current raw point, the neighbour
        // region from the next one.
        let bi = v.r as usize;
        let ai = (bi + 1) % pn;
        v.r = (points[ai].r & (CONTOUR_REG_MASK | AREA_BORDER)) | (points[bi].r & BORDER_VERTEX);
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() && simplified.len() > 1 {
        let ni = (i + 1) % simplified.len();
        if simplified[i].x == simplified[ni].x && simplified[i].z == simplified[ni].z {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed xz area; positive for outlines, negative for holes
fn contour_area(verts: &[ContourVertex]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        area += vi.x * vj.z - vj.x * vi.z;
        j = i;
    }
    (area + 1) / 2
}

#[inline]
pub(crate) fn area2(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> i32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

#[inline]
pub(crate) fn left(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn vequal(a: &ContourVertex, b: &ContourVertex) -> bool {
    a.x == b.x && a.z == b.z
}

pub(crate) fn collinear(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) == 0
}

pub(crate) fn intersect_prop(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex, d: &ContourVertex) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

pub(crate) fn between(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

pub(crate) fn intersect(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex, d: &ContourVertex) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Returns true if `pj` lies in the cone of vertex `i` of the contour
fn in_cone(i: usize, verts: &[ContourVertex], pj: &ContourVertex) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[(i + 1) % n];
    let pin1 = &verts[(i + n - 1) % n];

    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn intersect_seg_contour(
    d0: &ContourVertex,
    d1: &ContourVertex,
    skip: Option<usize>,
    verts: &[ContourVertex],
) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = &verts[k];
        let p1 = &verts[k1];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn leftmost_vertex(verts: &[ContourVertex]) -> (i32, i32, usize) {
    let mut best = (verts[0].x, verts[0].z, 0);
    for (i, v) in verts.iter().enumerate().skip(1) {
        if v.x < best.0 || (v.x == best.0 && v.z < best.1) {
            best = (v.x, v.z, i);
        }
    }
    best
}

/// Stitches `hole` into `outline` through the diagonal (ia, ib)
fn merge_contours(outline: &mut Contour, hole: &Contour, ia: usize, ib: usize) {
    let na = outline.verts.len();
    let nb = hole.verts.len();
    let mut verts = Vec::with_capacity(na + nb + 2);
    for i in 0..=na {
        verts.push(outline.verts[(ia + i) % na]);
    }
    for i in 0..=nb {
        verts.push(hole.verts[(ib + i) % nb]);
    }
    outline.verts = verts;
}

fn merge_holes(cset: &mut ContourSet) {
    let windings: Vec<i32> = cset.contours.iter().map(|c| contour_area(&c.verts)).collect();
    if windings.iter().all(|&a| a >= 0) {
        return;
    }

    let max_reg = cset.contours.iter().map(|c| c.reg).max().unwrap_or(0) as usize;
    let mut outlines: Vec<Option<usize>> = vec![None; max_reg + 1];
    let mut holes: Vec<Vec<usize>> = vec![Vec::new(); max_reg + 1];
    for (i, c) in cset.contours.iter().enumerate() {
        if windings[i] > 0 {
            if outlines[c.reg as usize].is_some() {
                log::warn!("Multiple outlines for region {}", c.reg);
            }
            outlines[c.reg as usize] = Some(i);
        } else {
            holes[c.reg as usize].push(i);
        }
    }

    let mut unmerged = 0;
    for reg in 0..=max_reg {
        if holes[reg].is_empty() {
            continue;
        }
        let Some(outline_idx) = outlines[reg] else {
            log::warn!("Region {} has holes but no outline", reg);
            continue;
        };

        // Merge holes from left to right.
        let mut region_holes: Vec<(usize, (i32, i32, usize))> = holes[reg]
            .iter()
            .map(|&h| (h, leftmost_vertex(&cset.contours[h].verts)))
            .collect();
        region_holes.sort_by_key(|&(_, (x, z, _))| (x, z));

        for hi in 0..region_holes.len() {
            let (hole_idx, (_, _, leftmost)) = region_holes[hi];
            let hole = cset.contours[hole_idx].clone();
            let outline = &cset.contours[outline_idx];
            let nh = hole.verts.len();

            let mut found = None;
            let mut best_vertex = leftmost;
            for _ in 0..nh {
                let corner = &hole.verts[best_vertex];

                let mut diags: Vec<(usize, i32)> = (0..outline.verts.len())
                    .filter(|&j| in_cone(j, &outline.verts, corner))
                    .map(|j| {
                        let dx = outline.verts[j].x - corner.x;
                        let dz = outline.verts[j].z - corner.z;
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diags.sort_by_key(|&(_, d)| d);

                // Shortest diagonal crossing neither the outline nor the
                // holes still to be merged.
                found = diags.iter().map(|&(j, _)| j).find(|&j| {
                    let pt = &outline.verts[j];
                    !intersect_seg_contour(pt, corner, Some(j), &outline.verts)
                        && region_holes[hi..].iter().all(|&(h, _)| {
                            !intersect_seg_contour(pt, corner, None, &cset.contours[h].verts)
                        })
                });
                if found.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % nh;
            }

            match found {
                Some(index) => {
                    merge_contours(&mut cset.contours[outline_idx], &hole, index, best_vertex);
                }
                None => {
                    log::warn!("Failed to find merge points for hole of region {}", reg);
                    unmerged += 1;
                }
            }
        }
    }

    // Unmerged holes cannot be triangulated on their own and are dropped too.
    let mut index = 0;
    cset.contours.retain(|_| {
        let keep = windings[index] > 0;
        index += 1;
        keep
    });
    if unmerged > 0 {
        log::debug!("Dropped {} unmerged holes", unmerged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::watershed::build_regions;

    fn contours_for(w: i32, h: i32, border: i32, walkable: impl Fn(i32, i32) -> bool) -> ContourSet {
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
                if walkable(x, z) {
                    hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
                }
            }
        }
        let mut chf = CompactHeightfield::build(10, 2, &hf).unwrap();
        build_distance_field(&mut chf);
        build_regions(&mut chf, border, 2, 20).unwrap();
        ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap()
    }

    #[test]
    fn test_square_contour() {
        let cset = contours_for(11, 11, 0, |_, _| true);
        assert_eq!(cset.contours.len(), 1);

        let contour = &cset.contours[0];
        let mut corners: Vec<(i32, i32)> = contour.verts.iter().map(|v| (v.x, v.z)).collect();
        corners.sort_unstable();
        assert_eq!(corners, vec![(0, 0), (0, 11), (11, 0), (11, 11)]);
        assert!(contour_area(&contour.verts) > 0);
        assert_eq!(contour.raw_verts.len(), 44);
    }

    #[test]
    fn test_border_offset_removed() {
        let cset = contours_for(16, 16, 3, |_, _| true);
        assert_eq!((cset.width, cset.height), (10, 10));
        assert!((cset.bmin.x - 3.0).abs() < 1e-6);

        let contour = &cset.contours[0];
        for v in &contour.verts {
            assert!((0..=10).contains(&v.x) && (0..=10).contains(&v.z));
        }
        // Every edge borders a border region.
        assert!(contour.verts.iter().all(|v| v.neighbour_region() != 0));
    }

    #[test]
    fn test_holes_never_survive() {
        let cset = contours_for(20, 20, 0, |x, z| !((8..12).contains(&x) && (8..12).contains(&z)));
        assert!(!cset.contours.is_empty());
        for contour in &cset.contours {
            assert!(contour_area(&contour.verts) > 0);
        }
    }

    fn square(reg: u16, pts: &[(i32, i32)]) -> Contour {
        let verts: Vec<ContourVertex> =
            pts.iter().map(|&(x, z)| ContourVertex::new(x, 0, z, 0)).collect();
        Contour {
            raw_verts: verts.clone(),
            verts,
            reg,
            area: 63,
        }
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        let mut cset = ContourSet {
            contours: vec![
                square(1, &[(0, 0), (0, 10), (10, 10), (10, 0)]),
                // Holes wind opposite to their outline.
                square(1, &[(4, 4), (6, 4), (6, 6), (4, 6)]),
            ],
            width: 10,
            height: 10,
            bmin: Vec3::ZERO,
            bmax: Vec3::splat(10.0),
            cs: 1.0,
            ch: 1.0,
            border_size: 0,
            max_error: 1.3,
        };
        assert!(contour_area(&cset.contours[1].verts) < 0);

        merge_holes(&mut cset);
        assert_eq!(cset.contours.len(), 1);
        let merged = &cset.contours[0];
        assert_eq!(merged.verts.len(), 10);
        assert_eq!(contour_area(&merged.verts), 96);
        // The bridge starts at the outline corner closest to the hole.
        assert!(vequal(&merged.verts[0], &ContourVertex::new(0, 0, 0, 0)));
        assert!(merged.verts.iter().any(|v| vequal(v, &ContourVertex::new(6, 0, 6, 0))));
    }

    #[test]
    fn test_long_edges_are_split() {
        let mut hf = Heightfield::new(30, 4, Vec3::ZERO, Vec3::new(30.0, 1.0, 4.0), 1.0, 0.1);
        for z in 0..4 {
            for x in 0..30 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(10, 2, &hf).unwrap();
        build_distance_field(&mut chf);
        build_regions(&mut chf, 0, 2, 200).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 8, BuildContoursFlags::default()).unwrap();

        for contour in &cset.contours {
            let verts = &contour.verts;
            for i in 0..verts.len() {
                let a = verts[i];
                let b = verts[(i + 1) % verts.len()];
                if a.neighbour_region() != 0 {
                    continue;
                }
                let len_sq = (b.x - a.x).pow(2) + (b.z - a.z).pow(2);
                assert!(len_sq <= 64, "edge {:?} -> {:?} too long", a, b);
            }
        }
    }

    #[test]
    fn test_degenerate_segments_removed() {
        let mut verts = vec![
            ContourVertex::new(0, 0, 0, 0),
            ContourVertex::new(0, 1, 0, 0),
            ContourVertex::new(5, 0, 0, 0),
            ContourVertex::new(5, 0, 5, 0),
        ];
        remove_degenerate_segments(&mut verts);
        assert_eq!(verts.len(), 3);
    }
}
