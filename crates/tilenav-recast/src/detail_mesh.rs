//! Detail mesh generation
//!
//! Every polygon of the [`PolyMesh`] is re-triangulated against the height
//! data of the compact heightfield so that the surface follows the terrain
//! within `sample_max_error`.

use glam::Vec3;

use tilenav_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{dir_offset_x, dir_offset_z};
use crate::polymesh::PolyMesh;

const UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

/// Heights sampled from the compact heightfield under a polygon
#[derive(Debug, Default)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    #[inline]
    fn index(&self, hx: i32, hz: i32) -> Option<usize> {
        if hx < 0 || hz < 0 || hx >= self.width || hz >= self.height {
            return None;
        }
        Some((hx + hz * self.width) as usize)
    }
}

/// Per polygon triangle meshes following the height of the terrain
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// `[vert base, vert count, tri base, tri count]` per polygon
    pub meshes: Vec<[u32; 4]>,
    /// World space vertices; the first vertices of each sub-mesh are the
    /// polygon's own vertices
    pub verts: Vec<Vec3>,
    /// Local vertex indices and edge flags per triangle
    pub tris: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    /// Builds the detail mesh of every polygon in `mesh`
    pub fn build(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut dmesh = Self::default();
        if mesh.verts.is_empty() || mesh.npolys == 0 {
            return Ok(dmesh);
        }
        if (mesh.cs - chf.cs).abs() > 1e-6 || (mesh.ch - chf.ch).abs() > 1e-6 {
            return Err(Error::InvalidConfig(
                "poly mesh and compact heightfield use different cell sizes".to_string(),
            ));
        }

        let cs = mesh.cs;
        let ch = mesh.ch;
        let orig = mesh.bmin;
        let border_size = mesh.border_size;
        let height_search_radius = (mesh.max_edge_error.ceil() as i32).max(1);

        let mut hp = HeightPatch::default();
        let mut queue = Vec::with_capacity(512);
        let mut edges = Vec::with_capacity(64);
        let mut samples = Vec::with_capacity(512);

        dmesh.meshes.reserve(mesh.npolys);
        for i in 0..mesh.npolys {
            let pv = mesh.poly_verts(i);

            let mut xmin = chf.width;
            let mut xmax = 0;
            let mut zmin = chf.height;
            let mut zmax = 0;
            for &v in pv {
                let v = mesh.verts[v as usize];
                xmin = xmin.min(v[0] as i32);
                xmax = xmax.max(v[0] as i32);
                zmin = zmin.min(v[2] as i32);
                zmax = zmax.max(v[2] as i32);
            }
            hp.xmin = (xmin - 1).max(0);
            hp.zmin = (zmin - 1).max(0);
            hp.width = (xmax + 1).min(chf.width) - hp.xmin;
            hp.height = (zmax + 1).min(chf.height) - hp.zmin;

            let poly: Vec<Vec3> = pv
                .iter()
                .map(|&v| {
                    let v = mesh.verts[v as usize];
                    Vec3::new(v[0] as f32 * cs, v[1] as f32 * ch, v[2] as f32 * cs)
                })
                .collect();

            get_height_data(chf, pv, &mesh.verts, border_size, &mut hp, &mut queue, mesh.regs[i]);

            let (verts, tris) = build_poly_detail(
                &poly,
                sample_dist,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
                &mut edges,
                &mut samples,
            );

            dmesh.meshes.push([
                dmesh.verts.len() as u32,
                verts.len() as u32,
                dmesh.tris.len() as u32,
                tris.len() as u32,
            ]);
            for t in &tris {
                let flags = tri_flags(verts[t[0]], verts[t[1]], verts[t[2]], &poly);
                dmesh.tris.push([t[0] as u8, t[1] as u8, t[2] as u8, flags]);
            }
            // Detail vertices sit one cell above the span floor.
            dmesh
                .verts
                .extend(verts.iter().map(|&v| v + orig + Vec3::new(0.0, chf.ch, 0.0)));
        }

        log::trace!(
            "Built detail mesh: {} verts, {} tris",
            dmesh.verts.len(),
            dmesh.tris.len()
        );

        Ok(dmesh)
    }

    /// Vertices of the sub-mesh of polygon `i`
    pub fn poly_verts(&self, i: usize) -> &[Vec3] {
        let m = self.meshes[i];
        &self.verts[m[0] as usize..(m[0] + m[1]) as usize]
    }

    /// Triangles of the sub-mesh of polygon `i`
    pub fn poly_tris(&self, i: usize) -> &[[u8; 4]] {
        let m = self.meshes[i];
        &self.tris[m[2] as usize..(m[2] + m[3]) as usize]
    }
}

fn dir_for_offset(x: i32, z: i32) -> usize {
    match (x, z) {
        (-1, 0) => 0,
        (0, 1) => 1,
        (1, 0) => 2,
        _ => 3,
    }
}

/// Walks from the span closest to one of the polygon vertices towards the
/// polygon centre and seeds the height patch there
fn seed_array_with_poly_center(
    chf: &CompactHeightfield,
    poly: &[u16],
    verts: &[[u16; 3]],
    bs: i32,
    hp: &mut HeightPatch,
    queue: &mut Vec<(i32, i32, usize)>,
) {
    const OFFSETS: [(i32, i32); 9] = [
        (0, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let mut start = None;
    let mut dmin = i32::MAX;
    for &pv in poly {
        let v = verts[pv as usize];
        for (ox, oz) in OFFSETS {
            let ax = v[0] as i32 + ox;
            let az = v[2] as i32 + oz;
            if ax < hp.xmin || ax >= hp.xmin + hp.width || az < hp.zmin || az >= hp.zmin + hp.height {
                continue;
            }
            let cell = chf.cell(ax + bs, az + bs);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let d = (v[1] as i32 - chf.spans[i].y as i32).abs();
                if d < dmin {
                    start = Some((ax, az, i));
                    dmin = d;
                }
            }
        }
    }

    let Some((mut cx, mut cz, mut ci)) = start else {
        log::warn!("No span found under polygon vertices");
        return;
    };

    let n = poly.len() as i32;
    let pcx = poly.iter().map(|&v| verts[v as usize][0] as i32).sum::<i32>() / n;
    let pcz = poly.iter().map(|&v| verts[v as usize][2] as i32).sum::<i32>() / n;

    // The patch doubles as the visited set during the walk.
    hp.data.fill(0);
    let mut stack = vec![(cx, cz, ci)];
    let mut dirs = [0usize, 1, 2, 3];
    loop {
        let Some((x, z, i)) = stack.pop() else {
            log::warn!("Walk towards polygon center failed to reach center");
            break;
        };
        cx = x;
        cz = z;
        ci = i;
        if cx == pcx && cz == pcz {
            break;
        }

        // The direct direction goes last so it is popped first.
        let direct_dir = if cx == pcx {
            dir_for_offset(0, if pcz > cz { 1 } else { -1 })
        } else {
            dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
        };
        dirs.swap(direct_dir, 3);
        for &dir in &dirs {
            let Some(layer) = chf.spans[ci].connection(dir) else {
                continue;
            };
            let nx = cx + dir_offset_x(dir);
            let nz = cz + dir_offset_z(dir);
            let Some(idx) = hp.index(nx - hp.xmin, nz - hp.zmin) else {
                continue;
            };
            if hp.data[idx] != 0 {
                continue;
            }
            hp.data[idx] = 1;
            stack.push((nx, nz, chf.cell(nx + bs, nz + bs).index as usize + layer));
        }
        dirs.swap(direct_dir, 3);
    }

    queue.clear();
    queue.push((cx + bs, cz + bs, ci));
    hp.data.fill(UNSET_HEIGHT);
    if let Some(idx) = hp.index(cx - hp.xmin, cz - hp.zmin) {
        hp.data[idx] = chf.spans[ci].y;
    }
}

/// Fills the height patch with the floor heights of the polygon's region,
/// flooding outward into cells the region does not reach
fn get_height_data(
    chf: &CompactHeightfield,
    poly: &[u16],
    verts: &[[u16; 3]],
    bs: i32,
    hp: &mut HeightPatch,
    queue: &mut Vec<(i32, i32, usize)>,
    region: u16,
) {
    hp.data.clear();
    hp.data
        .resize((hp.width.max(0) * hp.height.max(0)) as usize, UNSET_HEIGHT);
    queue.clear();

    let mut empty = true;
    for hz in 0..hp.height {
        let z = hp.zmin + hz + bs;
        for hx in 0..hp.width {
            let x = hp.xmin + hx + bs;
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let s = &chf.spans[i];
                if s.reg != region {
                    continue;
                }
                hp.data[(hx + hz * hp.width) as usize] = s.y;
                empty = false;

                // Spans next to another region seed the flood.
                let border = (0..4).any(|dir| {
                    chf.neighbour(x, z, i, dir)
                        .is_some_and(|ai| chf.spans[ai].reg != region)
                });
                if border {
                    queue.push((x, z, i));
                }
                break;
            }
        }
    }

    if empty {
        seed_array_with_poly_center(chf, poly, verts, bs, hp, queue);
    }

    let mut head = 0;
    while head < queue.len() {
        let (cx, cz, ci) = queue[head];
        head += 1;

        for dir in 0..4 {
            let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            let ax = cx + dir_offset_x(dir);
            let az = cz + dir_offset_z(dir);
            let Some(idx) = hp.index(ax - hp.xmin - bs, az - hp.zmin - bs) else {
                continue;
            };
            if hp.data[idx] != UNSET_HEIGHT {
                continue;
            }
            hp.data[idx] = chf.spans[ai].y;
            queue.push((ax, az, ai));
        }
    }
}

/// Height at (fx, fz) in the patch; when the cell has no data, the nearest
/// valid height in a spiral of `radius` cells is used instead
fn get_height(fx: f32, fy: f32, fz: f32, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    if hp.width <= 0 || hp.height <= 0 {
        return UNSET_HEIGHT;
    }
    let ix = ((fx * ics + 0.01).floor() as i32 - hp.xmin).clamp(0, hp.width - 1);
    let iz = ((fz * ics + 0.01).floor() as i32 - hp.zmin).clamp(0, hp.height - 1);
    let mut h = hp.data[(ix + iz * hp.width) as usize];
    if h != UNSET_HEIGHT {
        return h;
    }

    let (mut x, mut z, mut dx, mut dz) = (1i32, 0i32, 1i32, 0i32);
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;
    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;
    let mut dmin = f32::MAX;

    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if let Some(idx) = hp.index(nx, nz) {
            let nh = hp.data[idx];
            if nh != UNSET_HEIGHT {
                let d = (nh as f32 * ch - fy).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        // Stop at the end of the first ring that produced a height.
        if i + 1 == next_ring_iter_start {
            if h != UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }

    h
}

#[inline]
fn vcross2(p1: Vec3, p2: Vec3, p3: Vec3) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

#[inline]
fn vdist2(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

fn circum_circle(p1: Vec3, p2: Vec3, p3: Vec3) -> (Vec3, f32) {
    const EPS: f32 = 1e-6;
    // Relative to p1 to limit precision loss.
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = vcross2(Vec3::ZERO, v2, v3);
    if cp.abs() > EPS {
        let v2_sq = v2.x * v2.x + v2.z * v2.z;
        let v3_sq = v3.x * v3.x + v3.z * v3.z;
        let c = Vec3::new(
            (v2_sq * v3.z - v3_sq * v2.z) / (2.0 * cp),
            0.0,
            (v3_sq * v2.x - v2_sq * v3.x) / (2.0 * cp),
        );
        let r = vdist2(c, Vec3::ZERO);
        return (c + p1, r);
    }
    (p1, 0.0)
}

/// Vertical distance from `p` to the triangle under it, or `None` when
/// `p` is not above the triangle
fn dist_pt_tri(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.x * v0.x + v0.z * v0.z;
    let dot01 = v0.x * v1.x + v0.z * v1.z;
    let dot02 = v0.x * v2.x + v0.z * v2.z;
    let dot11 = v1.x * v1.x + v1.z * v1.z;
    let dot12 = v1.x * v2.x + v1.z * v2.z;

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        return Some((y - p.y).abs());
    }
    None
}

fn dist_to_tri_mesh(p: Vec3, verts: &[Vec3], tris: &[[usize; 3]]) -> Option<f32> {
    tris.iter()
        .filter_map(|t| dist_pt_tri(p, verts[t[0]], verts[t[1]], verts[t[2]]))
        .min_by(|a, b| a.total_cmp(b))
}

/// Squared distance from `pt` to segment pq
fn distance_pt_seg(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Squared xz distance from `pt` to segment pq
fn distance_pt_seg_2d(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    dx * dx + dz * dz
}

/// Squared xz distance to the polygon outline, negative inside
fn dist_to_poly(verts: &[Vec3], p: Vec3) -> f32 {
    let n = verts.len();
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_pt_seg_2d(p, vj, vi));
        j = i;
    }
    if inside {
        -dmin
    } else {
        dmin
    }
}

/// Smallest of the polygon's widths measured from each edge
fn poly_min_extent(verts: &[Vec3]) -> f32 {
    let n = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let max_edge_dist = (0..n)
            .filter(|&j| j != i && j != ni)
            .map(|j| distance_pt_seg_2d(verts[j], verts[i], verts[ni]))
            .fold(0.0f32, f32::max);
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

/// Fans the hull into triangles, starting from the original vertex with the
/// shortest ear perimeter and advancing on whichever side is shorter
fn triangulate_hull(verts: &[Vec3], hull: &[usize], nin: usize, tris: &mut Vec<[usize; 3]>) {
    let nhull = hull.len();
    if nhull < 3 {
        return;
    }

    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        // Ears centred on edge samples would be degenerate.
        if hull[i] >= nin {
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]];
        let cv = verts[hull[i]];
        let nv = verts[hull[ni]];
        let d = vdist2(pv, cv) + vdist2(cv, nv) + vdist2(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    tris.push([hull[start], hull[left], hull[right]]);

    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = vdist2(cvleft, nvleft) + vdist2(nvleft, cvright);
        let dright = vdist2(cvright, nvright) + vdist2(cvleft, nvright);

        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
}

fn find_edge(edges: &[[i32; 4]], s: i32, t: i32) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
}

fn add_edge(edges: &mut Vec<[i32; 4]>, max_edges: usize, s: i32, t: i32, l: i32, r: i32) {
    if edges.len() >= max_edges {
        log::error!("add_edge: too many edges ({}/{})", edges.len(), max_edges);
        return;
    }
    if find_edge(edges, s, t).is_none() {
        edges.push([s, t, l, r]);
    }
}

fn update_left_face(e: &mut [i32; 4], s: i32, t: i32, f: i32) {
    if e[0] == s && e[1] == t && e[2] == EV_UNDEF {
        e[2] = f;
    } else if e[1] == s && e[0] == t && e[3] == EV_UNDEF {
        e[3] = f;
    }
}

fn overlap_seg_seg_2d(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[Vec3], edges: &[[i32; 4]], s1: usize, t1: usize) -> bool {
    let (s1, t1) = (s1 as i32, t1 as i32);
    edges.iter().any(|e| {
        let (s0, t0) = (e[0], e[1]);
        // Edges sharing a vertex cannot overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(
            pts[s0 as usize],
            pts[t0 as usize],
            pts[s1 as usize],
            pts[t1 as usize],
        )
    })
}

fn complete_facet(pts: &[Vec3], edges: &mut Vec<[i32; 4]>, max_edges: usize, nfaces: &mut i32, e: usize) {
    const EPS: f32 = 1e-5;
    const TOLERANCE: f32 = 0.001;

    let edge = edges[e];
    let (s, t) = if edge[2] == EV_UNDEF {
        (edge[0] as usize, edge[1] as usize)
    } else if edge[3] == EV_UNDEF {
        (edge[1] as usize, edge[0] as usize)
    } else {
        return;
    };

    // Find the best point on the left of the edge.
    let npts = pts.len();
    let mut pt = npts;
    let mut c = Vec3::ZERO;
    let mut r = -1.0f32;
    for u in 0..npts {
        if u == s || u == t {
            continue;
        }
        if vcross2(pts[s], pts[t], pts[u]) <= EPS {
            continue;
        }
        if r < 0.0 {
            pt = u;
            (c, r) = circum_circle(pts[s], pts[t], pts[u]);
            continue;
        }
        let d = vdist2(c, pts[u]);
        if d > r * (1.0 + TOLERANCE) {
            continue;
        }
        if d >= r * (1.0 - TOLERANCE)
            && (overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u))
        {
            // On the circle: only accept it when the new edges stay valid.
            continue;
        }
        pt = u;
        (c, r) = circum_circle(pts[s], pts[t], pts[u]);
    }

    let (s, t) = (s as i32, t as i32);
    if pt < npts {
        let p = pt as i32;
        let face = *nfaces;
        update_left_face(&mut edges[e], s, t, face);

        match find_edge(edges, p, s) {
            Some(ei) => update_left_face(&mut edges[ei], p, s, face),
            None => add_edge(edges, max_edges, p, s, face, EV_UNDEF),
        }
        match find_edge(edges, t, p) {
            Some(ei) => update_left_face(&mut edges[ei], t, p, face),
            None => add_edge(edges, max_edges, t, p, face, EV_UNDEF),
        }
        *nfaces += 1;
    } else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
    }
}

/// Delaunay triangulation of `pts` constrained to the hull outline
fn delaunay_hull(pts: &[Vec3], hull: &[usize], tris: &mut Vec<[usize; 3]>, edges: &mut Vec<[i32; 4]>) {
    let max_edges = pts.len() * 10;
    let mut nfaces = 0i32;
    edges.clear();

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(edges, max_edges, hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current = 0;
    while current < edges.len() {
        if edges[current][2] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        if edges[current][3] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        current += 1;
    }

    let mut faces = vec![[-1i32; 3]; nfaces as usize];
    for e in edges.iter() {
        if e[3] >= 0 {
            let t = &mut faces[e[3] as usize];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            let t = &mut faces[e[2] as usize];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }

    tris.clear();
    let mut dangling = 0;
    for t in faces {
        if t.iter().any(|&v| v < 0) {
            dangling += 1;
            continue;
        }
        tris.push([t[0] as usize, t[1] as usize, t[2] as usize]);
    }
    if dangling > 0 {
        log::warn!("delaunay_hull: removed {} dangling faces", dangling);
    }
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Triangulates one polygon in local coordinates, returning the detail
/// vertices (polygon vertices first) and triangles
#[allow(clippy::too_many_arguments)]
fn build_poly_detail(
    input: &[Vec3],
    sample_dist: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    chf: &CompactHeightfield,
    hp: &HeightPatch,
    edges: &mut Vec<[i32; 4]>,
    samples: &mut Vec<[i32; 4]>,
) -> (Vec<Vec3>, Vec<[usize; 3]>) {
    let nin = input.len();
    let mut verts = input.to_vec();
    let mut hull = Vec::with_capacity(MAX_VERTS);
    let mut tris = Vec::new();

    let cs = chf.cs;
    let ics = 1.0 / cs;
    let min_extent = poly_min_extent(&verts);

    if sample_dist > 0.0 {
        // Edges are sampled in a fixed order so neighbouring polygons agree.
        let mut j = nin - 1;
        for i in 0..nin {
            let mut vj = input[j];
            let mut vi = input[i];
            let mut swapped = false;
            if (vj.x - vi.x).abs() < 1e-6 {
                if vj.z > vi.z {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj.x > vi.x {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }

            let delta = vi - vj;
            let d = (delta.x * delta.x + delta.z * delta.z).sqrt();
            let nn = (1 + (d / sample_dist).floor() as usize)
                .min(MAX_VERTS_PER_EDGE - 1)
                .min(MAX_VERTS.saturating_sub(1 + verts.len()))
                .max(1);

            let edge: Vec<Vec3> = (0..=nn)
                .map(|k| {
                    let u = k as f32 / nn as f32;
                    let mut pos = vj + delta * u;
                    pos.y = get_height(pos.x, pos.y, pos.z, ics, chf.ch, height_search_radius, hp) as f32
                        * chf.ch;
                    pos
                })
                .collect();

            // Keep only the samples that deviate more than the max error.
            let mut idx = vec![0, nn];
            let mut k = 0;
            while k + 1 < idx.len() {
                let a = idx[k];
                let b = idx[k + 1];
                let mut maxd = 0.0;
                let mut maxi = None;
                for m in a + 1..b {
                    let dev = distance_pt_seg(edge[m], edge[a], edge[b]);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                match maxi {
                    Some(m) if maxd > sample_max_error * sample_max_error => idx.insert(k + 1, m),
                    _ => k += 1,
                }
            }

            hull.push(j);
            let inner = &idx[1..idx.len() - 1];
            if swapped {
                for &m in inner.iter().rev() {
                    verts.push(edge[m]);
                    hull.push(verts.len() - 1);
                }
            } else {
                for &m in inner {
                    verts.push(edge[m]);
                    hull.push(verts.len() - 1);
                }
            }
            j = i;
        }
    } else {
        hull.extend(0..nin);
    }

    // Slivers and small triangles get no interior samples.
    if min_extent < sample_dist * 2.0 {
        triangulate_hull(&verts, &hull, nin, &mut tris);
        return (verts, tris);
    }

    triangulate_hull(&verts, &hull, nin, &mut tris);
    if tris.is_empty() {
        log::warn!("Could not triangulate polygon ({} verts)", verts.len());
        return (verts, tris);
    }

    if sample_dist > 0.0 {
        let mut bmin = input[0];
        let mut bmax = input[0];
        for &v in &input[1..] {
            bmin = bmin.min(v);
            bmax = bmax.max(v);
        }
        let x0 = (bmin.x / sample_dist).floor() as i32;
        let x1 = (bmax.x / sample_dist).ceil() as i32;
        let z0 = (bmin.z / sample_dist).floor() as i32;
        let z1 = (bmax.z / sample_dist).ceil() as i32;

        samples.clear();
        for z in z0..z1 {
            for x in x0..x1 {
                let pt = Vec3::new(
                    x as f32 * sample_dist,
                    (bmax.y + bmin.y) * 0.5,
                    z as f32 * sample_dist,
                );
                // Skip samples too close to the edges.
                if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                    continue;
                }
                let h = get_height(pt.x, pt.y, pt.z, ics, chf.ch, height_search_radius, hp);
                samples.push([x, h as i32, z, 0]);
            }
        }

        // Add the sample with the largest error until the surface is
        // within the max error.
        for _ in 0..samples.len() {
            if verts.len() >= MAX_VERTS {
                break;
            }

            let mut best: Option<(usize, f32, Vec3)> = None;
            for (i, s) in samples.iter().enumerate() {
                if s[3] != 0 {
                    continue;
                }
                let pt = Vec3::new(
                    s[0] as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                    s[1] as f32 * chf.ch,
                    s[2] as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                );
                let Some(d) = dist_to_tri_mesh(pt, &verts, &tris) else {
                    continue;
                };
                if d > best.map_or(0.0, |b| b.1) {
                    best = Some((i, d, pt));
                }
            }

            let Some((besti, bestd, bestpt)) = best else {
                break;
            };
            if bestd <= sample_max_error {
                break;
            }

            samples[besti][3] = 1;
            verts.push(bestpt);

            delaunay_hull(&verts, &hull, &mut tris, edges);
        }
    }

    if tris.len() > MAX_TRIS {
        log::warn!("Shrinking triangle count from {} to max {}", tris.len(), MAX_TRIS);
        tris.truncate(MAX_TRIS);
    }

    (verts, tris)
}

/// 1 when both ends of the edge lie on the same polygon edge
fn edge_flags(va: Vec3, vb: Vec3, poly: &[Vec3]) -> u8 {
    const THR_SQR: f32 = 0.001 * 0.001;
    let n = poly.len();
    let mut j = n - 1;
    for i in 0..n {
        if distance_pt_seg_2d(va, poly[j], poly[i]) < THR_SQR
            && distance_pt_seg_2d(vb, poly[j], poly[i]) < THR_SQR
        {
            return 1;
        }
        j = i;
    }
    0
}

fn tri_flags(va: Vec3, vb: Vec3, vc: Vec3, poly: &[Vec3]) -> u8 {
    edge_flags(va, vb, poly) | (edge_flags(vb, vc, poly) << 2) | (edge_flags(vc, va, poly) << 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, ContourSet};
    use crate::distance_field::build_distance_field;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use crate::watershed::build_regions;

    fn pipeline(
        n: i32,
        floor: impl Fn(i32, i32) -> u16,
        sample_dist: f32,
    ) -> (PolyMesh, PolyMeshDetail) {
        let mut hf = Heightfield::new(
            n,
            n,
            Vec3::ZERO,
            Vec3::new(n as f32, 4.0, n as f32),
            1.0,
            0.5,
        );
        for z in 0..n {
            for x in 0..n {
                hf.add_span(x, z, 0, floor(x, z), WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(4, 2, &hf).unwrap();
        build_distance_field(&mut chf);
        build_regions(&mut chf, 0, 2, 20).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        let detail = PolyMeshDetail::build(&mesh, &chf, sample_dist, 0.2).unwrap();
        (mesh, detail)
    }

    #[test]
    fn test_flat_polygon_needs_no_samples() {
        let (mesh, detail) = pipeline(11, |_, _| 2, 2.0);
        assert_eq!(mesh.npolys, 1);
        assert_eq!(detail.meshes.len(), 1);
        assert_eq!(detail.meshes[0], [0, 4, 0, 2]);

        for v in &detail.verts {
            assert!((v.y - 1.5).abs() < 1e-4, "vertex {v:?} off the floor");
        }
        // The first sub-mesh vertices are the polygon's own.
        for (k, &pv) in mesh.poly_verts(0).iter().enumerate() {
            let expected = mesh.vert_world(pv as usize);
            let got = detail.poly_verts(0)[k];
            assert!((got.x - expected.x).abs() < 1e-4 && (got.z - expected.z).abs() < 1e-4);
        }
    }

    #[test]
    fn test_bump_adds_interior_vertex() {
        let (_, detail) = pipeline(
            11,
            |x, z| if (4..7).contains(&x) && (4..7).contains(&z) { 3 } else { 2 },
            1.0,
        );
        assert!(detail.meshes[0][1] > 4);
        assert!(detail.verts.iter().any(|v| (v.y - 2.0).abs() < 1e-4));
        assert_eq!(detail.poly_tris(0).len(), detail.meshes[0][3] as usize);
    }

    #[test]
    fn test_zero_sample_distance_keeps_polygon_verts() {
        let (mesh, detail) = pipeline(11, |_, _| 2, 0.0);
        assert_eq!(detail.meshes[0][1] as usize, mesh.poly_verts(0).len());
    }

    #[test]
    fn test_outline_edges_are_flagged() {
        let (_, detail) = pipeline(11, |_, _| 2, 2.0);
        for t in detail.poly_tris(0) {
            // A triangle of a quad has two outline edges and the diagonal.
            let outline_edges = (0..3).filter(|k| (t[3] >> (k * 2)) & 3 != 0).count();
            assert_eq!(outline_edges, 2);
        }
    }

    #[test]
    fn test_triangulate_hull_square() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        let mut tris = Vec::new();
        triangulate_hull(&verts, &[0, 1, 2, 3], 4, &mut tris);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_delaunay_with_centre_point() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 2.1),
        ];
        let mut tris = Vec::new();
        let mut edges = Vec::new();
        delaunay_hull(&verts, &[0, 1, 2, 3], &mut tris, &mut edges);
        assert_eq!(tris.len(), 4);
        assert!(tris.iter().all(|t| t.contains(&4)));
    }

    #[test]
    fn test_dist_to_poly_sign() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        assert!(dist_to_poly(&square, Vec3::new(2.0, 0.0, 2.0)) < 0.0);
        assert!(dist_to_poly(&square, Vec3::new(6.0, 0.0, 2.0)) > 0.0);
        assert!((poly_min_extent(&square) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_mismatched_cell_size_rejected() {
        let (mesh, _) = pipeline(11, |_, _| 2, 0.0);
        let hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::splat(4.0), 0.5, 0.5);
        let chf = CompactHeightfield::build(4, 2, &hf).unwrap();
        assert!(PolyMeshDetail::build(&mesh, &chf, 1.0, 0.2).is_err());
    }
}
