use std::fmt;

use serde::{Deserialize, Serialize};

/// Chunk width (X axis) in blocks.
pub const CHUNK_SIZE_X: usize = 16;
/// Chunk depth (Z axis) in blocks.
pub const CHUNK_SIZE_Z: usize = 16;
/// Number of vertical columns in one chunk footprint.
pub const CHUNK_COLUMNS: usize = CHUNK_SIZE_X * CHUNK_SIZE_Z;

/// Edge length of a tectonic plate, in chunks.
pub const PLATE_SIZE_CHUNKS: i32 = 32;

/// Chunk coordinate (X,Z) in chunk space.
/// Implements Ord so maps keyed by it iterate deterministically (x, then z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
}

impl ChunkPos {
    /// Create a chunk position.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// World-space X of the chunk's first column.
    #[inline]
    pub fn origin_x(self) -> i32 {
        self.x * CHUNK_SIZE_X as i32
    }

    /// World-space Z of the chunk's first column.
    #[inline]
    pub fn origin_z(self) -> i32 {
        self.z * CHUNK_SIZE_Z as i32
    }

    /// Plate owning this chunk.
    #[inline]
    pub fn plate(self) -> PlateCoord {
        PlateCoord::new(
            self.x.div_euclid(PLATE_SIZE_CHUNKS),
            self.z.div_euclid(PLATE_SIZE_CHUNKS),
        )
    }

    /// Index of this chunk inside its plate's section table.
    #[inline]
    pub fn plate_section_index(self) -> usize {
        let lx = self.x.rem_euclid(PLATE_SIZE_CHUNKS) as usize;
        let lz = self.z.rem_euclid(PLATE_SIZE_CHUNKS) as usize;
        lz * PLATE_SIZE_CHUNKS as usize + lx
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Integer key of a tectonic plate (chunk coordinates divided by the plate size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlateCoord {
    /// Plate X.
    pub x: i32,
    /// Plate Z.
    pub z: i32,
}

impl PlateCoord {
    /// Create a plate coordinate.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for PlateCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}
