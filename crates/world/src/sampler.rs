//! Per-point terrain inputs and their per-chunk snapshot.

use serde::{Deserialize, Serialize};
use strata_core::{BlockId, ChunkPos, CHUNK_COLUMNS, CHUNK_SIZE_X, CHUNK_SIZE_Z};

/// Biome classification of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BiomeId(pub u16);

impl BiomeId {
    /// Mild land biome.
    pub const TEMPERATE: BiomeId = BiomeId(0);
    /// Hot, dry land biome.
    pub const ARID: BiomeId = BiomeId(1);
    /// Cold biome with frozen seas.
    pub const FROZEN: BiomeId = BiomeId(2);
}

/// Region classification of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u16);

/// Pure per-point functions describing the terrain. Implementations must be
/// deterministic for a given world.
pub trait Sampler: Send + Sync {
    /// Surface height, or `None` where no terrain exists.
    fn height_at(&self, x: i32, z: i32) -> Option<f64>;
    /// Biome of the column.
    fn biome_at(&self, x: i32, z: i32) -> BiomeId;
    /// Region of the column.
    fn region_at(&self, x: i32, z: i32) -> RegionId;
    /// Block filling the flooded range above the surface.
    fn fluid_block_at(&self, x: i32, z: i32) -> BlockId;
    /// Block filling solid ground below the layer sequences.
    fn rock_block_at(&self, x: i32, z: i32) -> BlockId;
}

/// Everything the synthesizer needs to know about one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSample {
    /// Raw surface height, possibly fractional or absent.
    pub height: Option<f64>,
    /// Biome of the column.
    pub biome: BiomeId,
    /// Region of the column.
    pub region: RegionId,
    /// Fluid block.
    pub fluid: BlockId,
    /// Rock block.
    pub rock: BlockId,
}

impl ColumnSample {
    /// Query every sampler function for one point.
    pub fn from_sampler(sampler: &dyn Sampler, x: i32, z: i32) -> Self {
        Self {
            height: sampler.height_at(x, z),
            biome: sampler.biome_at(x, z),
            region: sampler.region_at(x, z),
            fluid: sampler.fluid_block_at(x, z),
            rock: sampler.rock_block_at(x, z),
        }
    }
}

/// Sampler results for every point of one chunk, taken once before synthesis.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pos: ChunkPos,
    columns: Vec<ColumnSample>,
}

impl ChunkContext {
    /// Sample all 256 points of `pos`.
    pub fn sample(sampler: &dyn Sampler, pos: ChunkPos) -> Self {
        let mut columns = Vec::with_capacity(CHUNK_COLUMNS);
        for lz in 0..CHUNK_SIZE_Z {
            for lx in 0..CHUNK_SIZE_X {
                let x = pos.origin_x() + lx as i32;
                let z = pos.origin_z() + lz as i32;
                columns.push(ColumnSample::from_sampler(sampler, x, z));
            }
        }
        Self { pos, columns }
    }

    /// Build a context where every column shares one sample.
    pub fn uniform(pos: ChunkPos, sample: ColumnSample) -> Self {
        Self {
            pos,
            columns: vec![sample; CHUNK_COLUMNS],
        }
    }

    /// Chunk the context was sampled for.
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Sample at a chunk-local column.
    pub fn column(&self, local_x: usize, local_z: usize) -> &ColumnSample {
        &self.columns[local_z * CHUNK_SIZE_X + local_x]
    }

    /// Height at a world position inside this chunk; `None` outside it.
    pub fn height_at(&self, x: i32, z: i32) -> Option<f64> {
        let lx = x - self.pos.origin_x();
        let lz = z - self.pos.origin_z();
        if !(0..CHUNK_SIZE_X as i32).contains(&lx) || !(0..CHUNK_SIZE_Z as i32).contains(&lz) {
            return None;
        }
        self.column(lx as usize, lz as usize).height
    }
}
