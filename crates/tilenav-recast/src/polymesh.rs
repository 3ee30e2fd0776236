//! Convex polygon mesh built from simplified contours
//!
//! Contours are ear-clipped into triangles, which are then greedily merged
//! into convex polygons of up to `nvp` vertices. Edges lying on the tile
//! border are tagged as portals so tiles can be stitched together later.

use std::collections::HashMap;

use glam::Vec3;

use tilenav_common::{Error, Result};

use crate::contour::{intersect, intersect_prop, left, left_on, vequal, ContourSet, ContourVertex};

/// Null index for unused polygon vertex and neighbour slots
pub const MESH_NULL_IDX: u16 = 0xffff;
/// Set on a neighbour slot whose edge lies on the tile border; the low bits
/// hold the side (0: -x, 1: +z, 2: +x, 3: -z)
pub const PORTAL_FLAG: u16 = 0x8000;

const MAX_MESH_VERTS: usize = 0xfffe;
/// Vertices closer than this in y (cell units) collapse into one
const VERTEX_MERGE_HEIGHT: i32 = 2;

/// A mesh of convex polygons in cell coordinates
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertices in cells relative to `bmin`
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex indices followed by `nvp` neighbour entries per polygon
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub areas: Vec<u8>,
    /// User flags, assigned when the tile is assembled
    pub flags: Vec<u16>,
    pub npolys: usize,
    /// Maximum vertices per polygon
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Creates an empty mesh
    pub fn new(nvp: usize, border_size: i32) -> Self {
        Self {
            verts: Vec::new(),
            polys: Vec::new(),
            regs: Vec::new(),
            areas: Vec::new(),
            flags: Vec::new(),
            npolys: 0,
            nvp,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            cs: 0.0,
            ch: 0.0,
            border_size,
            max_edge_error: 0.0,
        }
    }

    /// Triangulates every contour and merges the triangles into convex
    /// polygons of at most `nvp` vertices
    pub fn build_from_contour_set(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=crate::config::MAX_VERTS_PER_POLY).contains(&nvp) {
            return Err(Error::InvalidConfig(format!(
                "vertices per polygon must be in 3..={}, got {}",
                crate::config::MAX_VERTS_PER_POLY,
                nvp
            )));
        }

        let mut mesh = PolyMesh::new(nvp, cset.border_size);
        mesh.bmin = cset.bmin;
        mesh.bmax = cset.bmax;
        mesh.cs = cset.cs;
        mesh.ch = cset.ch;
        mesh.max_edge_error = cset.max_error;

        let mut vertex_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();

        for contour in &cset.contours {
            if contour.verts.len() < 3 {
                continue;
            }

            let (tris, complete) = triangulate(&contour.verts);
            if !complete {
                log::warn!(
                    "Bad triangulation for contour of region {} ({} verts)",
                    contour.reg,
                    contour.verts.len()
                );
            }

            let mut indices = Vec::with_capacity(contour.verts.len());
            for v in &contour.verts {
                indices.push(add_vertex(
                    &mut mesh.verts,
                    &mut vertex_lookup,
                    v.x as u16,
                    v.y as u16,
                    v.z as u16,
                )?);
            }

            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .map(|t| [indices[t[0]], indices[t[1]], indices[t[2]]])
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| t.to_vec())
                .collect();
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polys(&mut polys, &mesh.verts, nvp);
            }

            for poly in polys {
                let mut row = vec![MESH_NULL_IDX; nvp * 2];
                row[..poly.len()].copy_from_slice(&poly);
                mesh.polys.extend_from_slice(&row);
                mesh.regs.push(contour.reg);
                mesh.areas.push(contour.area);
                mesh.npolys += 1;
            }
        }

        mesh.flags = vec![0; mesh.npolys];
        mesh.build_adjacency();
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(cset.width, cset.height);
        }

        log::trace!(
            "Built poly mesh: {} verts, {} polys",
            mesh.verts.len(),
            mesh.npolys
        );

        Ok(mesh)
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    /// All `nvp` vertex slots of a polygon, including unused ones
    pub fn poly(&self, i: usize) -> &[u16] {
        let start = i * self.nvp * 2;
        &self.polys[start..start + self.nvp]
    }

    /// The used vertex indices of a polygon
    pub fn poly_verts(&self, i: usize) -> &[u16] {
        let poly = self.poly(i);
        let n = poly.iter().position(|&v| v == MESH_NULL_IDX).unwrap_or(self.nvp);
        &poly[..n]
    }

    /// Neighbour entries of a polygon, one per vertex slot
    pub fn neighbours(&self, i: usize) -> &[u16] {
        let start = i * self.nvp * 2 + self.nvp;
        &self.polys[start..start + self.nvp]
    }

    fn neighbours_mut(&mut self, i: usize) -> &mut [u16] {
        let start = i * self.nvp * 2 + self.nvp;
        &mut self.polys[start..start + self.nvp]
    }

    /// World space position of a vertex
    pub fn vert_world(&self, i: usize) -> Vec3 {
        let v = self.verts[i];
        Vec3::new(
            self.bmin.x + v[0] as f32 * self.cs,
            self.bmin.y + v[1] as f32 * self.ch,
            self.bmin.z + v[2] as f32 * self.cs,
        )
    }

    fn build_adjacency(&mut self) {
        // (low, high) vertex pair -> (poly, edge) of the first polygon seen
        let mut open_edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
        let mut links = Vec::new();

        for i in 0..self.npolys {
            let verts = self.poly_verts(i).to_vec();
            let n = verts.len();
            for j in 0..n {
                let v0 = verts[j];
                let v1 = verts[(j + 1) % n];
                let key = (v0.min(v1), v0.max(v1));
                match open_edges.remove(&key) {
                    Some((p, e)) if p != i => links.push((p, e, i, j)),
                    Some(first) => {
                        open_edges.insert(key, first);
                    }
                    None => {
                        open_edges.insert(key, (i, j));
                    }
                }
            }
        }

        for (pa, ea, pb, eb) in links {
            self.neighbours_mut(pa)[ea] = pb as u16;
            self.neighbours_mut(pb)[eb] = pa as u16;
        }
    }

    fn mark_portal_edges(&mut self, w: i32, h: i32) {
        for i in 0..self.npolys {
            let verts = self.poly_verts(i).to_vec();
            let n = verts.len();
            for j in 0..n {
                if self.neighbours(i)[j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.verts[verts[j] as usize];
                let vb = self.verts[verts[(j + 1) % n] as usize];

                let side = if va[0] == 0 && vb[0] == 0 {
                    Some(0)
                } else if va[2] as i32 == h && vb[2] as i32 == h {
                    Some(1)
                } else if va[0] as i32 == w && vb[0] as i32 == w {
                    Some(2)
                } else if va[2] == 0 && vb[2] == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.neighbours_mut(i)[j] = PORTAL_FLAG | side;
                }
            }
        }
    }
}

fn add_vertex(
    verts: &mut Vec<[u16; 3]>,
    lookup: &mut HashMap<(u16, u16), Vec<u16>>,
    x: u16,
    y: u16,
    z: u16,
) -> Result<u16> {
    let bucket = lookup.entry((x, z)).or_default();
    if let Some(&existing) = bucket
        .iter()
        .find(|&&i| (verts[i as usize][1] as i32 - y as i32).abs() <= VERTEX_MERGE_HEIGHT)
    {
        return Ok(existing);
    }

    if verts.len() >= MAX_MESH_VERTS {
        return Err(Error::NavMeshGeneration(format!(
            "too many vertices in poly mesh (max {})",
            MAX_MESH_VERTS
        )));
    }
    let index = verts.len() as u16;
    verts.push([x, y, z]);
    bucket.push(index);
    Ok(index)
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

/// Ear-clips a simple polygon
///
/// Returns triangles as indices into `verts` and whether the polygon was
/// fully triangulated; on failure the triangles found so far are returned.
pub(crate) fn triangulate(verts: &[ContourVertex]) -> (Vec<[usize; 3]>, bool) {
    let mut indices: Vec<usize> = (0..verts.len()).collect();
    let mut removable = vec![false; verts.len()];
    let mut tris = Vec::with_capacity(verts.len().saturating_sub(2));

    let mut n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        removable[i1] = diagonal(i, i2, verts, &indices);
    }

    while n > 3 {
        let ear_len = |i: usize| {
            let p0 = &verts[indices[i]];
            let p2 = &verts[indices[next(next(i, n), n)]];
            let dx = p2.x - p0.x;
            let dz = p2.z - p0.z;
            dx * dx + dz * dz
        };

        let mut best: Option<(usize, i32)> = None;
        for i in 0..n {
            if removable[next(i, n)] {
                let len = ear_len(i);
                if best.map_or(true, |(_, l)| len < l) {
                    best = Some((i, len));
                }
            }
        }

        if best.is_none() {
            // Overlapping segments can hide every ear; retry with the
            // looser test.
            for i in 0..n {
                let i2 = next(next(i, n), n);
                if diagonal_loose(i, i2, verts, &indices) {
                    let len = ear_len(i);
                    if best.map_or(true, |(_, l)| len < l) {
                        best = Some((i, len));
                    }
                }
            }
        }

        let Some((mut i, _)) = best else {
            return (tris, false);
        };

        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([indices[i], indices[i1], indices[i2]]);

        indices.remove(i1);
        removable.remove(i1);
        n -= 1;
        if i1 >= n {
            i1 = 0;
        }
        i = prev(i1, n);

        removable[i] = diagonal(prev(i, n), i1, verts, &indices);
        removable[i1] = diagonal(i, next(i1, n), verts, &indices);
    }

    tris.push([indices[0], indices[1], indices[2]]);
    (tris, true)
}

fn in_cone(i: usize, j: usize, verts: &[ContourVertex], indices: &[usize]) -> bool {
    let n = indices.len();
    let pi = &verts[indices[i]];
    let pj = &verts[indices[j]];
    let pi1 = &verts[indices[next(i, n)]];
    let pin1 = &verts[indices[prev(i, n)]];

    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, verts: &[ContourVertex], indices: &[usize]) -> bool {
    let n = indices.len();
    let pi = &verts[indices[i]];
    let pj = &verts[indices[j]];
    let pi1 = &verts[indices[next(i, n)]];
    let pin1 = &verts[indices[prev(i, n)]];

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// True if (i, j) is a proper internal or external diagonal, ignoring
/// edges incident to either end
fn diagonalie(
    i: usize,
    j: usize,
    verts: &[ContourVertex],
    indices: &[usize],
    intersects: fn(&ContourVertex, &ContourVertex, &ContourVertex, &ContourVertex) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = &verts[indices[i]];
    let d1 = &verts[indices[j]];

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = &verts[indices[k]];
        let p1 = &verts[indices[k1]];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersects(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, verts: &[ContourVertex], indices: &[usize]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, verts: &[ContourVertex], indices: &[usize]) -> bool {
    in_cone_loose(i, j, verts, indices) && diagonalie(i, j, verts, indices, intersect_prop)
}

#[inline]
fn uleft(a: &[u16; 3], b: &[u16; 3], c: &[u16; 3]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    let (bx, bz) = (b[0] as i32, b[2] as i32);
    let (cx, cz) = (c[0] as i32, c[2] as i32);
    (bx - ax) * (cz - az) - (cx - ax) * (bz - az) < 0
}

/// Length of the shared edge when `pa` and `pb` can be merged into a convex
/// polygon of at most `nvp` vertices, with the edge index in each
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[[u16; 3]], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (va0, va1) = (pa[i].min(pa[(i + 1) % na]), pa[i].max(pa[(i + 1) % na]));
        for j in 0..nb {
            let (vb0, vb1) = (pb[j].min(pb[(j + 1) % nb]), pb[j].max(pb[(j + 1) % nb]));
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    // Both corners at the shared edge must stay convex.
    let va = pa[(ea + na - 1) % na] as usize;
    let vb = pa[ea] as usize;
    let vc = pb[(eb + 2) % nb] as usize;
    if !uleft(&verts[va], &verts[vb], &verts[vc]) {
        return None;
    }
    let va = pb[(eb + nb - 1) % nb] as usize;
    let vb = pb[eb] as usize;
    let vc = pa[(ea + 2) % na] as usize;
    if !uleft(&verts[va], &verts[vb], &verts[vc]) {
        return None;
    }

    let a = verts[pa[ea] as usize];
    let b = verts[pa[(ea + 1) % na] as usize];
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged
}

/// Repeatedly merges the pair of polygons sharing the longest mergeable edge
fn merge_polys(polys: &mut Vec<Vec<u16>>, verts: &[[u16; 3]], nvp: usize) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.map_or(true, |b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        polys[pa] = merge_poly_verts(&polys[pa], &polys[pb], ea, eb);
        polys.swap_remove(pb);
    }
}
