//! Deterministic collaborators for tests: samplers, layer providers, plate
//! stores and merge sources with observable call counts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_core::blocks;
use strata_core::{BlockId, ChunkPos, PlateCoord, WorldRng, CHUNK_SIZE_X, CHUNK_SIZE_Z};
use strata_mantle::{MantleError, MemoryPlateStore, PlatePayload, PlateStore};
use strata_world::{
    BiomeId, ChunkBuffer, ColumnSample, InMemoryTerrainSources, LayerProvider, OreProvider,
    RegionId, Sampler, TerrainSource,
};

/// Sampler returning the same values everywhere.
#[derive(Debug, Clone, Copy)]
pub struct FlatSampler {
    /// Height of every column.
    pub height: Option<f64>,
    /// Biome of every column.
    pub biome: BiomeId,
    /// Region of every column.
    pub region: RegionId,
    /// Fluid block.
    pub fluid: BlockId,
    /// Rock block.
    pub rock: BlockId,
}

impl FlatSampler {
    /// Flat terrain at `height` with water and stone.
    pub fn new(height: f64) -> Self {
        Self {
            height: Some(height),
            biome: BiomeId(0),
            region: RegionId(0),
            fluid: blocks::WATER,
            rock: blocks::STONE,
        }
    }

    /// Sampler without any terrain.
    pub fn empty() -> Self {
        Self {
            height: None,
            ..Self::new(0.0)
        }
    }

    /// Same sampler in another biome.
    pub fn with_biome(mut self, biome: BiomeId) -> Self {
        self.biome = biome;
        self
    }

    /// Same sampler in another region.
    pub fn with_region(mut self, region: RegionId) -> Self {
        self.region = region;
        self
    }

    /// The sample every column gets.
    pub fn sample(&self) -> ColumnSample {
        ColumnSample {
            height: self.height,
            biome: self.biome,
            region: self.region,
            fluid: self.fluid,
            rock: self.rock,
        }
    }
}

impl Sampler for FlatSampler {
    fn height_at(&self, _x: i32, _z: i32) -> Option<f64> {
        self.height
    }
    fn biome_at(&self, _x: i32, _z: i32) -> BiomeId {
        self.biome
    }
    fn region_at(&self, _x: i32, _z: i32) -> RegionId {
        self.region
    }
    fn fluid_block_at(&self, _x: i32, _z: i32) -> BlockId {
        self.fluid
    }
    fn rock_block_at(&self, _x: i32, _z: i32) -> BlockId {
        self.rock
    }
}

type HeightFn = dyn Fn(i32, i32) -> Option<f64> + Send + Sync;

/// Sampler whose height is an arbitrary function; other values come from
/// [`FlatSampler::new`].
pub struct FnSampler {
    height: Box<HeightFn>,
    base: FlatSampler,
}

impl FnSampler {
    /// Wrap a height function.
    pub fn new(height: impl Fn(i32, i32) -> Option<f64> + Send + Sync + 'static) -> Self {
        Self {
            height: Box::new(height),
            base: FlatSampler::new(0.0),
        }
    }
}

impl Sampler for FnSampler {
    fn height_at(&self, x: i32, z: i32) -> Option<f64> {
        (self.height)(x, z)
    }
    fn biome_at(&self, x: i32, z: i32) -> BiomeId {
        self.base.biome_at(x, z)
    }
    fn region_at(&self, x: i32, z: i32) -> RegionId {
        self.base.region_at(x, z)
    }
    fn fluid_block_at(&self, x: i32, z: i32) -> BlockId {
        self.base.fluid_block_at(x, z)
    }
    fn rock_block_at(&self, x: i32, z: i32) -> BlockId {
        self.base.rock_block_at(x, z)
    }
}

/// Fixed layer sequences that count how often they are requested.
#[derive(Debug, Default)]
pub struct TableLayers {
    solid: Vec<BlockId>,
    sea: Vec<BlockId>,
    solid_calls: AtomicUsize,
    sea_calls: AtomicUsize,
}

impl TableLayers {
    /// Layers returned for every column.
    pub fn new(solid: Vec<BlockId>, sea: Vec<BlockId>) -> Self {
        Self {
            solid,
            sea,
            ..Default::default()
        }
    }

    /// Number of `solid_layers` calls so far.
    pub fn solid_calls(&self) -> usize {
        self.solid_calls.load(Ordering::SeqCst)
    }

    /// Number of `sea_layers` calls so far.
    pub fn sea_calls(&self) -> usize {
        self.sea_calls.load(Ordering::SeqCst)
    }
}

impl LayerProvider for TableLayers {
    fn solid_layers(&self, _: BiomeId, _: i32, _: i32, _: &WorldRng, _: i32) -> Vec<BlockId> {
        self.solid_calls.fetch_add(1, Ordering::SeqCst);
        self.solid.clone()
    }

    fn sea_layers(&self, _: BiomeId, _: i32, _: i32, _: &WorldRng, _: i32) -> Vec<BlockId> {
        self.sea_calls.fetch_add(1, Ordering::SeqCst);
        self.sea.clone()
    }
}

/// Ore scope that always answers the same.
#[derive(Debug, Clone, Copy)]
pub struct FixedOre(pub Option<BlockId>);

impl FixedOre {
    /// Places `block` everywhere.
    pub fn some(block: BlockId) -> Self {
        Self(Some(block))
    }

    /// Never places ore.
    pub fn none() -> Self {
        Self(None)
    }
}

impl OreProvider for FixedOre {
    fn ore_at(&self, _: &ColumnSample, _: i32, _: i32, _: i32, _: &WorldRng) -> Option<BlockId> {
        self.0
    }
}

/// In-memory plate store that counts calls and can stall loads.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryPlateStore,
    loads: AtomicUsize,
    persists: AtomicUsize,
    load_delay: Duration,
    fail_persist: AtomicBool,
}

impl CountingStore {
    /// Store with no load delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sleeps `delay` inside every load.
    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            load_delay: delay,
            ..Default::default()
        }
    }

    /// Loads performed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Persists performed (including failed ones).
    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    /// Whether a plate has been persisted.
    pub fn contains(&self, coord: PlateCoord) -> bool {
        self.inner.contains(coord)
    }

    /// Make every following persist fail (or succeed again).
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

impl PlateStore for CountingStore {
    fn load(&self, coord: PlateCoord) -> Result<Option<PlatePayload>, MantleError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        self.inner.load(coord)
    }

    fn persist(&self, coord: PlateCoord, payload: &PlatePayload) -> Result<(), MantleError> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(MantleError::Store {
                coord,
                source: anyhow::anyhow!("disk full"),
            });
        }
        self.inner.persist(coord, payload)
    }
}

/// Merge source filling every chunk with one block, or failing.
#[derive(Debug)]
pub struct GridSource {
    block: BlockId,
    height: usize,
    fail: bool,
    fetches: AtomicUsize,
}

impl GridSource {
    /// Source whose chunks are solid `block` up to `height`.
    pub fn filled(block: BlockId, height: usize) -> Self {
        Self {
            block,
            height,
            fail: false,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Source that cannot produce any chunk.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::filled(blocks::AIR, 0)
        }
    }

    /// Chunks requested so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TerrainSource for GridSource {
    fn fetch_chunk_grid(&self, chunk: ChunkPos) -> anyhow::Result<ChunkBuffer> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("chunk {chunk} has not been generated in the source world");
        }
        let mut grid = ChunkBuffer::new(chunk, self.height);
        for y in 0..self.height {
            for z in 0..CHUNK_SIZE_Z {
                for x in 0..CHUNK_SIZE_X {
                    grid.set(x, y, z, self.block);
                }
            }
        }
        Ok(grid)
    }
}

/// Registry exposing `source` under `world`.
pub fn sources_with_world(
    world: &str,
    source: Arc<dyn TerrainSource>,
) -> Arc<InMemoryTerrainSources> {
    let sources = InMemoryTerrainSources::new();
    sources.register(world, source);
    Arc::new(sources)
}
