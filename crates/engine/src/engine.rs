//! Engine lifecycle and chunk generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use strata_core::{ChunkPos, WorldRng};
use strata_mantle::{
    tectonic_limit, CleanerSettings, EngineLease, EngineRegistry, LoopState, Maintainable, Mantle,
    MantleCleaner, MantleStats, MemoryPlateStore, PlateStore, RegionPlateStore,
};
use strata_world::{
    ChunkBuffer, ChunkContext, ChunkOutcome, ColumnSynthesizer, Merger, Sampler, SynthMetrics,
    TerrainSources,
};
use tracing::{info, instrument, warn};

use crate::{EngineConfig, EngineError};

/// A generated chunk and how its synthesis went.
#[derive(Debug, Clone)]
pub struct GeneratedChunk {
    pub buffer: ChunkBuffer,
    pub outcome: ChunkOutcome,
}

/// Point-in-time view of an engine.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineMetrics {
    pub synth: SynthMetrics,
    pub mantle: MantleStats,
    /// Process-wide plate limit this engine shares.
    pub tectonic_limit: usize,
    /// Engines sharing the limit right now.
    pub active_engines: usize,
}

/// Chunks in the square of `radius` around `center`, row by row.
pub fn area_positions(center: ChunkPos, radius: u32) -> Vec<ChunkPos> {
    let r = radius as i32;
    (-r..=r)
        .flat_map(|dz| (-r..=r).map(move |dx| ChunkPos::new(center.x + dx, center.z + dz)))
        .collect()
}

/// One dimension's generator, its plate cache and that cache's cleaner.
///
/// Opening an engine registers it with the [`EngineRegistry`] so every
/// engine's maintenance loops get an equal share of the plate limit. Closing
/// stops the loops and flushes dirty plates; dropping an open engine closes it.
pub struct Engine {
    config: EngineConfig,
    sampler: Arc<dyn Sampler>,
    mantle: Arc<Mantle>,
    synth: ColumnSynthesizer,
    cleaner: MantleCleaner,
    workers: ThreadPool,
    closed: Arc<AtomicBool>,
    registry: EngineRegistry,
    tectonic_limit: usize,
    /// Registry membership; taken by `close`.
    lease: Mutex<Option<EngineLease>>,
}

impl Engine {
    /// Validate `config` and bring up an engine in the global registry.
    pub fn open(
        config: EngineConfig,
        sampler: Arc<dyn Sampler>,
        sources: Option<Arc<dyn TerrainSources>>,
    ) -> Result<Self, EngineError> {
        Self::open_in(config, sampler, sources, EngineRegistry::global())
    }

    /// Like [`Engine::open`], sharing the plate limit through `registry`.
    pub fn open_in(
        config: EngineConfig,
        sampler: Arc<dyn Sampler>,
        sources: Option<Arc<dyn TerrainSources>>,
        registry: &EngineRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let store: Arc<dyn PlateStore> = match &config.mantle.store_dir {
            Some(dir) => Arc::new(
                RegionPlateStore::new(dir)
                    .map_err(EngineError::Store)?
                    .with_compression_level(config.mantle.compression_level),
            ),
            None => Arc::new(MemoryPlateStore::new()),
        };
        let mantle = Arc::new(Mantle::new(store, config.mantle.settings()));

        let mut synth = ColumnSynthesizer::new(
            config.dimension.layout(),
            Arc::new(config.layer_table()),
            config.ore_chain(),
            WorldRng::new(config.seed),
        );
        if config.dimension.merge.is_active() {
            synth = synth.with_merger(Merger::new(
                config.dimension.merge.clone(),
                sources,
                Arc::clone(&mantle),
            ));
        }

        let workers = ThreadPoolBuilder::new()
            .num_threads(config.performance.workers)
            .thread_name({
                let name = config.name.clone();
                move |i| format!("{name}-gen-{i}")
            })
            .build()?;

        let lease = registry.register();
        let limit = tectonic_limit(config.mantle.memory_mb);
        let closed = Arc::new(AtomicBool::new(false));
        let cleaner = MantleCleaner::new(
            Arc::clone(&mantle) as Arc<dyn Maintainable>,
            Arc::clone(&closed),
            registry.clone(),
            CleanerSettings {
                name: config.name.clone(),
                limit,
                studio: config.performance.studio,
                trim_in_studio: config.performance.trim_mantle_in_studio,
            },
        );
        let loops = cleaner.enable();

        info!(
            engine = %config.name,
            seed = config.seed,
            height = config.dimension.height,
            merge = config.dimension.merge.is_active(),
            tectonic_limit = limit,
            engines = registry.active(),
            loops,
            "Engine opened"
        );

        Ok(Self {
            config,
            sampler,
            mantle,
            synth,
            cleaner,
            workers,
            closed,
            registry: registry.clone(),
            tectonic_limit: limit,
            lease: Mutex::new(Some(lease)),
        })
    }

    /// Engine name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's plate cache.
    pub fn mantle(&self) -> &Arc<Mantle> {
        &self.mantle
    }

    pub fn synthesizer(&self) -> &ColumnSynthesizer {
        &self.synth
    }

    /// Whether [`Engine::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// State of the trim and unload loops.
    pub fn maintenance_states(&self) -> (LoopState, LoopState) {
        self.cleaner.states()
    }

    /// Restart maintenance loops that are not running.
    pub fn enable_maintenance(&self) -> usize {
        self.cleaner.enable()
    }

    /// Stop maintenance. A hotload does not wait for the loops to exit.
    pub fn disable_maintenance(&self, hotload: bool) {
        self.cleaner.disable(hotload);
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.config.name.clone()));
        }
        Ok(())
    }

    /// Synthesize one chunk.
    ///
    /// A failed chunk is still returned, with a [`ChunkOutcome::Failed`]
    /// outcome; only merge misconfiguration is an error.
    pub fn generate_chunk(&self, pos: ChunkPos) -> Result<GeneratedChunk, EngineError> {
        self.ensure_open()?;
        let ctx = ChunkContext::sample(&*self.sampler, pos);
        let mut buffer = ChunkBuffer::new(pos, self.config.dimension.height);
        let outcome = self.synth.synthesize_chunk(&mut buffer, &ctx)?;
        Ok(GeneratedChunk { buffer, outcome })
    }

    /// Synthesize every chunk within `radius` of `center` on the worker pool.
    ///
    /// Chunks come back in [`area_positions`] order. The first merge
    /// configuration error aborts the area.
    #[instrument(skip(self), fields(engine = %self.config.name))]
    pub fn generate_area(
        &self,
        center: ChunkPos,
        radius: u32,
    ) -> Result<Vec<GeneratedChunk>, EngineError> {
        self.ensure_open()?;
        let positions = area_positions(center, radius);
        let started = Instant::now();
        let chunks = self.workers.install(|| {
            positions
                .par_iter()
                .map(|pos| self.generate_chunk(*pos))
                .collect::<Result<Vec<_>, _>>()
        })?;
        let failed = chunks.iter().filter(|c| !c.outcome.is_complete()).count();
        info!(
            chunks = chunks.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Area generated"
        );
        Ok(chunks)
    }

    /// Stop maintenance, leave the registry and persist dirty plates. Returns
    /// the plates written.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<usize, EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        self.cleaner.disable(false);
        drop(self.lease.lock().unwrap_or_else(PoisonError::into_inner).take());
        let flushed = self.mantle.flush()?;
        info!(engine = %self.config.name, flushed, "Engine closed");
        Ok(flushed)
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            synth: self.synth.metrics(),
            mantle: self.mantle.stats(),
            tectonic_limit: self.tectonic_limit,
            active_engines: self.registry.active(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(engine = %self.config.name, error = %err, "Engine close failed");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.config.name)
            .field("closed", &self.is_closed())
            .field("tectonic_limit", &self.tectonic_limit)
            .field("synth", &self.synth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_is_a_square_around_center() {
        let center = ChunkPos::new(10, -4);
        let area = area_positions(center, 2);
        assert_eq!(area.len(), 25);
        assert_eq!(area[0], ChunkPos::new(8, -6));
        assert_eq!(area[12], center);
        assert_eq!(area[24], ChunkPos::new(12, -2));
        assert_eq!(area_positions(center, 0), vec![center]);
    }
}
