//! Merge policy: replace part of each synthesized column with blocks copied
//! from another world.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strata_core::{RollingAverage, CHUNK_SIZE_X, CHUNK_SIZE_Z};
use strata_mantle::Mantle;
use tracing::{debug, instrument};

use crate::{ChunkBuffer, ChunkContext, MergeError, TerrainSource, TerrainSources};

/// Where the split threshold comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Never override.
    #[default]
    None,
    /// Fixed height for every column.
    Split,
    /// Each column's reference height minus `depth`.
    SplitTerrainHeight,
}

/// Merge configuration of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Master switch.
    pub enabled: bool,
    /// Threshold mode.
    pub mode: MergeMode,
    /// Threshold for [`MergeMode::Split`].
    pub split: i32,
    /// Override above the threshold when true, below it otherwise.
    pub split_under: bool,
    /// Distance below the reference height for [`MergeMode::SplitTerrainHeight`].
    pub depth: i32,
    /// Source world name.
    pub world: Option<String>,
    /// Source generator name; not supported.
    pub generator: Option<String>,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: MergeMode::None,
            split: 0,
            split_under: true,
            depth: 30,
            world: None,
            generator: None,
        }
    }
}

impl MergeSettings {
    /// Whether the merge pass does anything at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.mode != MergeMode::None
    }

    /// Reject settings that cannot work, before any chunk is generated.
    pub fn validate(&self) -> Result<(), MergeError> {
        if !self.is_active() {
            return Ok(());
        }
        if let Some(generator) = &self.generator {
            return Err(MergeError::UnsupportedSource {
                generator: generator.clone(),
            });
        }
        if self.world.is_none() {
            return Err(MergeError::MissingSource);
        }
        Ok(())
    }

    /// Split threshold of a column; `None` when the column is never overridden.
    ///
    /// `reference` is only consulted in terrain-height mode, where a missing
    /// reference leaves the column alone.
    pub fn threshold(&self, reference: Option<f64>) -> Option<i32> {
        match self.mode {
            MergeMode::None => None,
            MergeMode::Split => Some(self.split),
            MergeMode::SplitTerrainHeight => {
                let reference = reference.filter(|h| h.is_finite())?;
                Some((reference - f64::from(self.depth)).ceil() as i32)
            }
        }
    }

    /// Whether `level` of a column with the given reference height is taken
    /// from the merge source.
    pub fn should_override(&self, level: i32, reference: Option<f64>) -> bool {
        self.is_active()
            && self
                .threshold(reference)
                .is_some_and(|threshold| overrides(level, threshold, self.split_under))
    }
}

/// Direction rule: above the threshold when `split_under`, below it otherwise.
/// The threshold level itself is never overridden.
#[inline]
pub fn overrides(level: i32, threshold: i32, split_under: bool) -> bool {
    if split_under {
        level > threshold
    } else {
        level < threshold
    }
}

/// Applies [`MergeSettings`] to finished chunks.
pub struct Merger {
    settings: MergeSettings,
    sources: Option<Arc<dyn TerrainSources>>,
    mantle: Arc<Mantle>,
    timings: Mutex<RollingAverage>,
}

impl Merger {
    /// Create a merger. Missing `sources` only fail once a chunk needs them.
    pub fn new(
        settings: MergeSettings,
        sources: Option<Arc<dyn TerrainSources>>,
        mantle: Arc<Mantle>,
    ) -> Self {
        Self {
            settings,
            sources,
            mantle,
            timings: Mutex::new(RollingAverage::default()),
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    /// Rolling average of override passes, in milliseconds.
    pub fn average_ms(&self) -> f64 {
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .average()
    }

    fn resolve_source(&self) -> Result<Arc<dyn TerrainSource>, MergeError> {
        if let Some(generator) = &self.settings.generator {
            return Err(MergeError::UnsupportedSource {
                generator: generator.clone(),
            });
        }
        let world = self.settings.world.as_ref().ok_or(MergeError::MissingSource)?;
        let sources = self.sources.as_ref().ok_or(MergeError::SourceUninitialized)?;
        sources
            .source(world)
            .ok_or_else(|| MergeError::SourceUnavailable {
                world: world.clone(),
            })
    }

    /// Copy the override range of every column from the merge source.
    ///
    /// In terrain-height mode the chunk's whole reference field is resolved
    /// through the mantle before any column is touched. Returns the number of
    /// blocks replaced.
    #[instrument(skip_all, fields(chunk = %buffer.pos()))]
    pub fn apply_override(
        &self,
        buffer: &mut ChunkBuffer,
        ctx: &ChunkContext,
    ) -> Result<usize, MergeError> {
        if !self.settings.is_active() {
            return Ok(0);
        }
        let started = Instant::now();
        let source = self.resolve_source()?;
        let pos = buffer.pos();

        let reference = match self.settings.mode {
            MergeMode::SplitTerrainHeight => {
                Some(self.mantle.reference_heights(pos, |x, z| ctx.height_at(x, z))?)
            }
            _ => None,
        };
        let grid = source
            .fetch_chunk_grid(pos)
            .map_err(|source| MergeError::Fetch { chunk: pos, source })?;

        let mut replaced = 0;
        for lz in 0..CHUNK_SIZE_Z {
            for lx in 0..CHUNK_SIZE_X {
                let column_reference = reference.as_ref().map(|field| field[lz * CHUNK_SIZE_X + lx]);
                let Some(threshold) = self.settings.threshold(column_reference) else {
                    continue;
                };
                for level in 0..buffer.height() {
                    if overrides(level as i32, threshold, self.settings.split_under) {
                        buffer.set(lx, level, lz, grid.get(lx, level, lz));
                        replaced += 1;
                    }
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(elapsed);
        debug!(replaced, elapsed_ms = elapsed, "Merge override applied");
        Ok(replaced)
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("settings", &self.settings)
            .field("sources", &self.sources.is_some())
            .finish()
    }
}
