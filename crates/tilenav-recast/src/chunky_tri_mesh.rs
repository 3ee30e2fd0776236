//! Chunked triangle index for fast spatial queries over large meshes
//!
//! Triangles are partitioned into a flattened bounding-volume tree on the
//! xz plane. Each leaf holds at most `max_tris_per_chunk` triangles, and
//! internal nodes store an escape offset so a query walks the node array
//! once without recursion.

use tilenav_common::{Error, Rect, Result};

/// Indexed triangle soup used as rasterizer input
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TriMesh {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new(vertices: Vec<[f32; 3]>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    /// Builds a mesh from flat `x, y, z` and index buffers
    pub fn from_flat(vertices: &[f32], indices: &[u32]) -> Result<Self> {
        if vertices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "vertex buffer length is not a multiple of 3".to_string(),
            ));
        }
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "index buffer length is not a multiple of 3".to_string(),
            ));
        }
        Ok(Self {
            vertices: vertices.chunks_exact(3).map(|v| [v[0], v[1], v[2]]).collect(),
            triangles: indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect(),
        })
    }

    /// Checks the mesh is usable for rasterization
    pub fn validate(&self) -> Result<()> {
        if self.triangles.is_empty() {
            return Err(Error::InvalidMesh("mesh has no triangles".to_string()));
        }
        if let Some(v) = self
            .vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(Error::InvalidMesh(format!("vertex {v} is not finite")));
        }
        let nverts = self.vertices.len();
        for (i, tri) in self.triangles.iter().enumerate() {
            if tri.iter().any(|&idx| idx as usize >= nverts) {
                return Err(Error::InvalidMesh(format!(
                    "triangle {i} references a vertex outside 0..{nverts}"
                )));
            }
        }
        Ok(())
    }

    /// Returns the three vertices of a triangle
    #[inline]
    pub fn triangle_vertices(&self, tri: u32) -> [[f32; 3]; 3] {
        let t = self.triangles[tri as usize];
        [
            self.vertices[t[0] as usize],
            self.vertices[t[1] as usize],
            self.vertices[t[2] as usize],
        ]
    }

    /// Axis-aligned bounds of all vertices
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        tilenav_common::calc_bounds(&self.vertices)
    }
}

/// Contents of a node in the chunk tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Leaf referencing `count` entries of the sorted triangle list
    Leaf { start: usize, count: usize },
    /// Internal node; skipping the subtree advances the cursor by `escape`
    Internal { escape: usize },
}

/// A node of the flattened chunk tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkNode {
    pub bounds: Rect,
    pub kind: ChunkKind,
}

impl ChunkNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ChunkKind::Leaf { .. })
    }
}

struct BoundsItem {
    bounds: Rect,
    centroid: [f32; 2],
    index: u32,
}

/// Spatial index over the triangles of a [`TriMesh`]
#[derive(Debug, Clone)]
pub struct ChunkyTriMesh {
    mesh: TriMesh,
    nodes: Vec<ChunkNode>,
    tris: Vec<u32>,
    max_tris_per_chunk: usize,
    bmin: [f32; 3],
    bmax: [f32; 3],
}

impl ChunkyTriMesh {
    /// Builds the index, with leaves holding at most `tris_per_chunk` triangles
    pub fn build(mesh: TriMesh, tris_per_chunk: usize) -> Result<Self> {
        if tris_per_chunk == 0 {
            return Err(Error::InvalidConfig(
                "triangles per chunk must be at least 1".to_string(),
            ));
        }
        mesh.validate()?;

        let (bmin, bmax) = mesh
            .bounds()
            .ok_or_else(|| Error::InvalidMesh("mesh has no vertices".to_string()))?;

        let mut items: Vec<BoundsItem> = (0..mesh.triangles.len() as u32)
            .map(|index| {
                let verts = mesh.triangle_vertices(index);
                let mut bounds = Rect::empty();
                for v in &verts {
                    bounds.include(v);
                }
                BoundsItem {
                    bounds,
                    centroid: [
                        (verts[0][0] + verts[1][0] + verts[2][0]) / 3.0,
                        (verts[0][2] + verts[1][2] + verts[2][2]) / 3.0,
                    ],
                    index,
                }
            })
            .collect();

        let nchunks = items.len().div_ceil(tris_per_chunk);
        let mut nodes = Vec::with_capacity(nchunks * 4);
        let mut tris = Vec::with_capacity(items.len());
        subdivide(&mut items, tris_per_chunk, &mut nodes, &mut tris);

        let max_tris_per_chunk = nodes
            .iter()
            .filter_map(|n| match n.kind {
                ChunkKind::Leaf { count, .. } => Some(count),
                ChunkKind::Internal { .. } => None,
            })
            .max()
            .unwrap_or(0);

        log::debug!(
            "Built chunky mesh: {} triangles, {} nodes, max {} per chunk",
            tris.len(),
            nodes.len(),
            max_tris_per_chunk
        );

        Ok(Self {
            mesh,
            nodes,
            tris,
            max_tris_per_chunk,
            bmin,
            bmax,
        })
    }

    /// Returns the ids of the leaf nodes whose bounds overlap `rect`
    pub fn query_chunks(&self, rect: &Rect) -> Vec<usize> {
        let mut ids = Vec::new();
        let mut i = 0;
        while i < self.nodes.len() {
            let node = &self.nodes[i];
            let overlap = node.bounds.overlaps(rect);
            match node.kind {
                ChunkKind::Leaf { .. } => {
                    if overlap {
                        ids.push(i);
                    }
                    i += 1;
                }
                ChunkKind::Internal { escape } => {
                    if overlap {
                        i += 1;
                    } else {
                        i += escape;
                    }
                }
            }
        }
        ids
    }

    /// Triangle ids stored in a leaf node; empty for internal nodes
    pub fn chunk_triangles(&self, node: usize) -> &[u32] {
        match self.nodes.get(node).map(|n| n.kind) {
            Some(ChunkKind::Leaf { start, count }) => &self.tris[start..start + count],
            _ => &[],
        }
    }

    /// Returns every triangle held by a leaf overlapping `rect`
    ///
    /// The result is conservative: triangles of an overlapping leaf are all
    /// reported even if their own bounds miss the rectangle.
    pub fn query(&self, rect: &Rect) -> Vec<u32> {
        self.query_chunks(rect)
            .into_iter()
            .flat_map(|id| self.chunk_triangles(id).iter().copied())
            .collect()
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.mesh.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.mesh.triangles
    }

    pub fn nodes(&self) -> &[ChunkNode] {
        &self.nodes
    }

    pub fn triangle_count(&self) -> usize {
        self.tris.len()
    }

    /// Number of triangles in the largest leaf
    pub fn max_tris_per_chunk(&self) -> usize {
        self.max_tris_per_chunk
    }

    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        (self.bmin, self.bmax)
    }
}

fn subdivide(
    items: &mut [BoundsItem],
    tris_per_chunk: usize,
    nodes: &mut Vec<ChunkNode>,
    out_tris: &mut Vec<u32>,
) {
    let mut bounds = Rect::empty();
    for item in items.iter() {
        bounds.include_rect(&item.bounds);
    }

    if items.len() <= tris_per_chunk {
        let start = out_tris.len();
        out_tris.extend(items.iter().map(|it| it.index));
        nodes.push(ChunkNode {
            bounds,
            kind: ChunkKind::Leaf {
                start,
                count: items.len(),
            },
        });
        return;
    }

    let icur = nodes.len();
    nodes.push(ChunkNode {
        bounds,
        kind: ChunkKind::Internal { escape: 0 },
    });

    let axis = if bounds.width() >= bounds.depth() { 0 } else { 1 };
    items.sort_by(|a, b| {
        a.centroid[axis]
            .total_cmp(&b.centroid[axis])
            .then(a.index.cmp(&b.index))
    });

    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, tris_per_chunk, nodes, out_tris);
    subdivide(right, tris_per_chunk, nodes, out_tris);

    let escape = nodes.len() - icur;
    nodes[icur].kind = ChunkKind::Internal { escape };
}
