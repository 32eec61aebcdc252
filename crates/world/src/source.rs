//! External terrain sources used by the merge pass.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use strata_core::ChunkPos;

use crate::ChunkBuffer;

/// A world whose generated chunks can be copied into this one.
pub trait TerrainSource: Send + Sync {
    /// Dense block grid of one chunk footprint.
    fn fetch_chunk_grid(&self, chunk: ChunkPos) -> anyhow::Result<ChunkBuffer>;
}

/// Lookup of merge sources by world name.
pub trait TerrainSources: Send + Sync {
    /// The loaded source named `world`, if any.
    fn source(&self, world: &str) -> Option<Arc<dyn TerrainSource>>;
}

/// Registry of sources kept in memory by the host.
#[derive(Default)]
pub struct InMemoryTerrainSources {
    worlds: RwLock<HashMap<String, Arc<dyn TerrainSource>>>,
}

impl InMemoryTerrainSources {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `source` available under `world`, replacing any previous one.
    pub fn register(&self, world: impl Into<String>, source: Arc<dyn TerrainSource>) {
        self.worlds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(world.into(), source);
    }

    /// Withdraw a world, e.g. when it is unloaded.
    pub fn remove(&self, world: &str) -> bool {
        self.worlds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(world)
            .is_some()
    }
}

impl TerrainSources for InMemoryTerrainSources {
    fn source(&self, world: &str) -> Option<Arc<dyn TerrainSource>> {
        self.worlds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(world)
            .cloned()
    }
}
