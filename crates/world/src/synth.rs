//! Column synthesis.
//!
//! Turns a column's sampled height, biome and region into its block stack.
//! Columns are walked from the fluid top down to level 0: sea and solid layer
//! sequences are indexed by depth below their reference level, so the walk
//! direction matches the indexing.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strata_core::blocks;
use strata_core::{
    panic_message, BlockId, ChunkPos, RollingAverage, WorldRng, BLOCK_AIR, CHUNK_SIZE_X,
    CHUNK_SIZE_Z,
};
use tracing::{error, instrument, trace};

use crate::{ChunkBuffer, ChunkContext, LayerProvider, MergeError, Merger, OreChain, SynthError};

/// Vertical layout of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionSettings {
    /// Column height in blocks.
    pub height: usize,
    /// Fluid fills every column up to this level.
    pub fluid_height: i32,
    /// Level 0 is always bedrock.
    pub bedrock: bool,
}

impl Default for DimensionSettings {
    fn default() -> Self {
        Self {
            height: 256,
            fluid_height: 63,
            bedrock: true,
        }
    }
}

/// One column to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRequest {
    /// Owning chunk.
    pub chunk: ChunkPos,
    /// Column offset inside the chunk.
    pub local_x: usize,
    /// Column offset inside the chunk.
    pub local_z: usize,
    /// Vertical extent of the chunk.
    pub height: usize,
}

impl ColumnRequest {
    /// World-space X.
    pub fn world_x(&self) -> i32 {
        self.chunk.origin_x() + self.local_x as i32
    }

    /// World-space Z.
    pub fn world_z(&self) -> i32 {
        self.chunk.origin_z() + self.local_z as i32
    }
}

/// Result of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// All columns ran; `skipped_columns` had no height sample.
    Complete {
        /// Columns left empty for lack of a height.
        skipped_columns: usize,
        /// Blocks replaced by the merge pass.
        merged_blocks: usize,
    },
    /// Synthesis stopped early; the buffer holds whatever was written so far.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl ChunkOutcome {
    /// Whether the chunk finished.
    pub fn is_complete(&self) -> bool {
        matches!(self, ChunkOutcome::Complete { .. })
    }
}

/// Synthesis counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SynthMetrics {
    /// Chunks attempted.
    pub chunks: u64,
    /// Chunks reported as failed.
    pub failed: u64,
    /// Rolling average chunk time in milliseconds.
    pub avg_chunk_ms: f64,
    /// Slowest chunk in the rolling window, milliseconds.
    pub max_chunk_ms: f64,
    /// Rolling average merge pass time in milliseconds.
    pub avg_merge_ms: f64,
}

/// Produces block columns for one dimension.
pub struct ColumnSynthesizer {
    dimension: DimensionSettings,
    layers: Arc<dyn LayerProvider>,
    ores: OreChain,
    rng: WorldRng,
    merger: Option<Merger>,
    last_bedrock: AtomicI32,
    chunks: AtomicU64,
    failed: AtomicU64,
    timings: Mutex<RollingAverage>,
}

impl ColumnSynthesizer {
    /// Create a synthesizer sharing `rng` across all chunks it produces.
    pub fn new(
        dimension: DimensionSettings,
        layers: Arc<dyn LayerProvider>,
        ores: OreChain,
        rng: WorldRng,
    ) -> Self {
        Self {
            dimension,
            layers,
            ores,
            rng,
            merger: None,
            last_bedrock: AtomicI32::new(-1),
            chunks: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timings: Mutex::new(RollingAverage::default()),
        }
    }

    /// Run `merger` after every chunk.
    pub fn with_merger(mut self, merger: Merger) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Dimension layout.
    pub fn dimension(&self) -> &DimensionSettings {
        &self.dimension
    }

    /// Last level bedrock was placed at, or -1 before any.
    pub fn last_bedrock(&self) -> i32 {
        self.last_bedrock.load(Ordering::Relaxed)
    }

    /// Build the block stack of one column, bottom first, `req.height` long.
    ///
    /// Returns `None` when the column has no height sample.
    pub fn synthesize_column(&self, req: &ColumnRequest, ctx: &ChunkContext) -> Option<Vec<BlockId>> {
        let sample = ctx.column(req.local_x, req.local_z);
        let raw_height = sample.height?;
        let mut column = vec![BLOCK_AIR; req.height];
        if req.height == 0 {
            return Some(column);
        }

        let limit = req.height as i32;
        let surface = (raw_height.round() as i32).clamp(0, limit - 1);
        let fluid = self.dimension.fluid_height.max(surface);
        let (x, z) = (req.world_x(), req.world_z());

        let mut solid: Option<Vec<BlockId>> = None;
        let mut sea: Option<Vec<BlockId>> = None;

        for level in (0..=fluid.min(limit - 1)).rev() {
            if level == 0 && self.dimension.bedrock {
                column[0] = blocks::BEDROCK;
                self.last_bedrock.store(0, Ordering::Relaxed);
                continue;
            }

            let block = if level > surface {
                let sea = sea.get_or_insert_with(|| {
                    self.layers
                        .sea_layers(sample.biome, x, z, &self.rng, fluid - surface)
                });
                sea.get((fluid - level) as usize)
                    .copied()
                    .unwrap_or(sample.fluid)
            } else {
                let solid = solid.get_or_insert_with(|| {
                    self.layers
                        .solid_layers(sample.biome, x, z, &self.rng, surface)
                });
                match solid.get((surface - level) as usize) {
                    Some(block) => *block,
                    None => self
                        .ores
                        .resolve(sample, x, level, z, &self.rng)
                        .unwrap_or(sample.rock),
                }
            };
            column[level as usize] = block;
        }

        Some(column)
    }

    /// Synthesize every column of `buffer`'s chunk, then run the merge pass.
    ///
    /// Panics and runtime merge failures are contained: they are logged and
    /// reported as [`ChunkOutcome::Failed`], leaving the buffer partially
    /// written. Only merge configuration errors are returned.
    #[instrument(skip_all, fields(chunk = %ctx.pos()))]
    pub fn synthesize_chunk(
        &self,
        buffer: &mut ChunkBuffer,
        ctx: &ChunkContext,
    ) -> Result<ChunkOutcome, SynthError> {
        let pos = ctx.pos();
        debug_assert_eq!(buffer.pos(), pos);
        let started = Instant::now();
        self.chunks.fetch_add(1, Ordering::Relaxed);

        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<_, MergeError> {
            let mut skipped = 0usize;
            for local_z in 0..CHUNK_SIZE_Z {
                for local_x in 0..CHUNK_SIZE_X {
                    let req = ColumnRequest {
                        chunk: pos,
                        local_x,
                        local_z,
                        height: buffer.height(),
                    };
                    match self.synthesize_column(&req, ctx) {
                        Some(column) => buffer.set_column(local_x, local_z, &column),
                        None => skipped += 1,
                    }
                }
            }
            let merged = match &self.merger {
                Some(merger) => merger.apply_override(buffer, ctx)?,
                None => 0,
            };
            Ok((skipped, merged))
        }));

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(elapsed);
        trace!(elapsed_ms = elapsed, "Chunk synthesized");

        let reason = match result {
            Ok(Ok((skipped_columns, merged_blocks))) => {
                return Ok(ChunkOutcome::Complete {
                    skipped_columns,
                    merged_blocks,
                })
            }
            Ok(Err(err)) if err.is_configuration() => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(SynthError::Merge {
                    chunk: pos,
                    source: err,
                });
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(&*payload),
        };

        self.failed.fetch_add(1, Ordering::Relaxed);
        error!(chunk = %pos, %reason, "Chunk synthesis failed");
        Ok(ChunkOutcome::Failed { reason })
    }

    /// Snapshot of the timing and failure counters.
    pub fn metrics(&self) -> SynthMetrics {
        let timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        SynthMetrics {
            chunks: self.chunks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            avg_chunk_ms: timings.average(),
            max_chunk_ms: timings.max(),
            avg_merge_ms: self.merger.as_ref().map_or(0.0, Merger::average_ms),
        }
    }
}

impl std::fmt::Debug for ColumnSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnSynthesizer")
            .field("dimension", &self.dimension)
            .field("ores", &self.ores)
            .field("merger", &self.merger)
            .finish()
    }
}
