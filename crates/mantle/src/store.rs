use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use strata_core::PlateCoord;

use crate::{MantleError, PlatePayload};

/// Backing storage for plates evicted from the mantle.
pub trait PlateStore: Send + Sync {
    /// Load a previously persisted plate; `Ok(None)` when it was never stored.
    fn load(&self, coord: PlateCoord) -> Result<Option<PlatePayload>, MantleError>;

    /// Persist a plate payload, replacing any earlier copy.
    fn persist(&self, coord: PlateCoord, payload: &PlatePayload) -> Result<(), MantleError>;
}

/// Process-local store for worlds that are never written to disk.
#[derive(Default)]
pub struct MemoryPlateStore {
    plates: Mutex<HashMap<PlateCoord, PlatePayload>>,
}

impl MemoryPlateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored plates.
    pub fn len(&self) -> usize {
        self.plates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a payload exists for the plate.
    pub fn contains(&self, coord: PlateCoord) -> bool {
        self.plates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&coord)
    }
}

impl PlateStore for MemoryPlateStore {
    fn load(&self, coord: PlateCoord) -> Result<Option<PlatePayload>, MantleError> {
        Ok(self
            .plates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&coord)
            .cloned())
    }

    fn persist(&self, coord: PlateCoord, payload: &PlatePayload) -> Result<(), MantleError> {
        self.plates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coord, payload.clone());
        Ok(())
    }
}
