//! Rasterized tile layers and their binary format
//!
//! A layer is the filtered, obstacle-marked solid heightfield of one tile,
//! border included. Layers are stored lz4-compressed and decoded again when
//! a tile is rebuilt without re-rasterizing.
//!
//! Layout, little-endian: magic `TNLY`, version, tile x and y, bmin, bmax,
//! cell size, cell height, width and height as `u16`, then per column a
//! `u16` span count followed by `min: u16, max: u16, area: u8` per span.

use glam::Vec3;
use tilenav_common::{Error, Result};
use tilenav_recast::{Heightfield, Span, NULL_AREA};

use crate::compressor::TileCompressor;
use crate::tile_grid::TileCoord;

/// Magic number of serialized layers, `TNLY` read as a little-endian u32
pub const TILE_LAYER_MAGIC: u32 = u32::from_le_bytes(*b"TNLY");

/// Version of the serialized layer format
pub const TILE_LAYER_VERSION: u32 = 1;

const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 12 + 12 + 4 + 4 + 2 + 2;
const SPAN_SIZE: usize = 5;

/// Solid spans of one tile, border padding included
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    pub coord: TileCoord,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: u16,
    pub height: u16,
    columns: Vec<Vec<Span>>,
}

impl TileLayer {
    /// Takes over the spans of a rasterized heightfield
    pub fn from_heightfield(coord: TileCoord, hf: Heightfield) -> Result<Self> {
        let width = u16::try_from(hf.width)
            .map_err(|_| Error::NavMeshGeneration(format!("layer width {} too large", hf.width)))?;
        let height = u16::try_from(hf.height)
            .map_err(|_| Error::NavMeshGeneration(format!("layer height {} too large", hf.height)))?;
        if let Some(column) = hf.columns().iter().find(|c| c.len() > u16::MAX as usize) {
            return Err(Error::NavMeshGeneration(format!(
                "column with {} spans",
                column.len()
            )));
        }
        Ok(Self {
            coord,
            bmin: hf.bmin,
            bmax: hf.bmax,
            cs: hf.cs,
            ch: hf.ch,
            width,
            height,
            columns: hf.into_columns(),
        })
    }

    /// Restores the heightfield the layer was captured from
    pub fn to_heightfield(&self) -> Result<Heightfield> {
        Heightfield::from_columns(
            self.width as i32,
            self.height as i32,
            self.bmin,
            self.bmax,
            self.cs,
            self.ch,
            self.columns.clone(),
        )
    }

    pub fn columns(&self) -> &[Vec<Span>] {
        &self.columns
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != NULL_AREA)
            .count()
    }

    /// Serialized size in bytes
    pub fn byte_size(&self) -> usize {
        HEADER_SIZE + self.columns.len() * 2 + self.span_count() * SPAN_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size());
        bytes.extend_from_slice(&TILE_LAYER_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&TILE_LAYER_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.coord.x.to_le_bytes());
        bytes.extend_from_slice(&self.coord.y.to_le_bytes());
        for v in [self.bmin, self.bmax] {
            for c in v.to_array() {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&self.cs.to_le_bytes());
        bytes.extend_from_slice(&self.ch.to_le_bytes());
        bytes.extend_from_slice(&self.width.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());

        for column in &self.columns {
            bytes.extend_from_slice(&(column.len() as u16).to_le_bytes());
            for span in column {
                bytes.extend_from_slice(&span.min.to_le_bytes());
                bytes.extend_from_slice(&span.max.to_le_bytes());
                bytes.push(span.area);
            }
        }
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let magic = reader.u32()?;
        if magic != TILE_LAYER_MAGIC {
            return Err(Error::CorruptLayer(format!("bad magic {magic:#010x}")));
        }
        let version = reader.u32()?;
        if version != TILE_LAYER_VERSION {
            return Err(Error::CorruptLayer(format!(
                "unsupported layer version {version}"
            )));
        }

        let coord = TileCoord::new(reader.i32()?, reader.i32()?);
        let bmin = Vec3::new(reader.f32()?, reader.f32()?, reader.f32()?);
        let bmax = Vec3::new(reader.f32()?, reader.f32()?, reader.f32()?);
        let cs = reader.f32()?;
        let ch = reader.f32()?;
        let width = reader.u16()?;
        let height = reader.u16()?;
        if !(cs > 0.0) || !(ch > 0.0) {
            return Err(Error::CorruptLayer(format!(
                "invalid cell size {cs} x {ch}"
            )));
        }

        let ncols = width as usize * height as usize;
        let mut columns = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            let count = reader.u16()? as usize;
            let mut column = Vec::with_capacity(count);
            for _ in 0..count {
                column.push(Span {
                    min: reader.u16()?,
                    max: reader.u16()?,
                    area: reader.u8()?,
                });
            }
            columns.push(column);
        }
        if reader.remaining() != 0 {
            return Err(Error::CorruptLayer(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        let layer = Self {
            coord,
            bmin,
            bmax,
            cs,
            ch,
            width,
            height,
            columns,
        };
        // Catches overlapping or unsorted spans.
        layer.to_heightfield()?;
        Ok(layer)
    }

    /// Serializes and compresses the layer
    pub fn compress(&self, compressor: &dyn TileCompressor) -> Result<CompressedTileLayer> {
        let raw = self.to_bytes();
        Ok(CompressedTileLayer {
            coord: self.coord,
            raw_size: raw.len(),
            data: compressor.compress(&raw)?,
        })
    }
}

/// A serialized, compressed layer as kept by the tile cache
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CompressedTileLayer {
    pub coord: TileCoord,
    /// Size of the uncompressed layer bytes
    pub raw_size: usize,
    pub data: Vec<u8>,
}

impl CompressedTileLayer {
    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }

    /// Decompresses and decodes the layer, checking it belongs to `coord`
    pub fn decompress(&self, compressor: &dyn TileCompressor) -> Result<TileLayer> {
        let raw = compressor.decompress(&self.data)?;
        if raw.len() != self.raw_size {
            return Err(Error::CorruptLayer(format!(
                "expected {} bytes, decoded {}",
                self.raw_size,
                raw.len()
            )));
        }
        let layer = TileLayer::from_bytes(&raw)?;
        if layer.coord != self.coord {
            return Err(Error::CorruptLayer(format!(
                "layer for tile {} stored under {}",
                layer.coord, self.coord
            )));
        }
        Ok(layer)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .data
            .get(self.offset..self.offset + N)
            .ok_or_else(|| {
                Error::CorruptLayer(format!("unexpected end of data at byte {}", self.offset))
            })?;
        self.offset += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32> {
        self.take().map(f32::from_le_bytes)
    }
}
