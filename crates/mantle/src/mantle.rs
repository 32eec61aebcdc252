//! The plate cache.
//!
//! Lookups go through a small index (coordinate -> slot plus recency order).
//! Each slot owns a mutex around its plate so that concurrent callers of
//! [`Mantle::get`] for the same coordinate wait on one load instead of racing.
//! Lock order is always index, then slot; the index lock is never held while
//! blocking on a slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use rayon::prelude::*;
use serde::Serialize;
use strata_core::{ChunkPos, PlateCoord, CHUNK_COLUMNS, CHUNK_SIZE_X};
use tracing::{debug, instrument, warn};

use crate::{MantleError, PlateStore, TectonicPlate};

/// Tuning knobs for one mantle.
#[derive(Debug, Clone)]
pub struct MantleSettings {
    /// Plates untouched for this long are unloaded even when under budget.
    pub idle_unload: Duration,
}

impl Default for MantleSettings {
    fn default() -> Self {
        Self {
            idle_unload: Duration::from_secs(60),
        }
    }
}

/// Counters describing cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MantleStats {
    /// Plates currently held in memory.
    pub resident: usize,
    /// `get` calls served from memory.
    pub hits: u64,
    /// `get` calls that had to load or create the plate.
    pub misses: u64,
    /// Plates loaded or created.
    pub loads: u64,
    /// Sections dropped by trim passes.
    pub trimmed_sections: u64,
    /// Plates removed by unload passes.
    pub unloaded: u64,
    /// Plates written to the backing store.
    pub persisted: u64,
}

#[derive(Default)]
struct PlateSlot {
    plate: Mutex<Option<Arc<TectonicPlate>>>,
}

impl PlateSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<TectonicPlate>>> {
        self.plate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PlateIndex {
    slots: HashMap<PlateCoord, Arc<PlateSlot>>,
    /// Recency order; most recently requested first.
    lru: LruCache<PlateCoord, ()>,
}

/// What an eviction attempt did to a slot.
enum Eviction {
    Unloaded,
    /// The slot never held a plate.
    Vacant,
    /// Someone still uses the plate or slot.
    Held,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    trimmed_sections: AtomicU64,
    unloaded: AtomicU64,
    persisted: AtomicU64,
}

/// Concurrent cache of tectonic plates backed by a [`PlateStore`].
pub struct Mantle {
    store: Arc<dyn PlateStore>,
    settings: MantleSettings,
    index: Mutex<PlateIndex>,
    epoch: Instant,
    trim_pass: AtomicU64,
    /// Slots holding a loaded plate. Slots still loading or left empty by a
    /// failed load are not counted.
    loaded: AtomicUsize,
    counters: Counters,
}

impl Mantle {
    /// Create an empty mantle over `store`.
    pub fn new(store: Arc<dyn PlateStore>, settings: MantleSettings) -> Self {
        Self {
            store,
            settings,
            index: Mutex::new(PlateIndex {
                slots: HashMap::new(),
                lru: LruCache::unbounded(),
            }),
            epoch: Instant::now(),
            trim_pass: AtomicU64::new(0),
            loaded: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Fetch a plate, loading or creating it on first access.
    ///
    /// Concurrent calls for the same coordinate perform one load and all
    /// observe the same plate. A failed load leaves nothing behind, so the
    /// next call retries.
    pub fn get(&self, coord: PlateCoord) -> Result<Arc<TectonicPlate>, MantleError> {
        let slot = {
            let mut index = self.lock_index();
            index.lru.put(coord, ());
            Arc::clone(index.slots.entry(coord).or_default())
        };

        let mut guard = slot.lock();
        if let Some(plate) = guard.as_ref() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            plate.touch(self.now_ms());
            return Ok(Arc::clone(plate));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.load(coord).and_then(|payload| match payload {
            Some(payload) => TectonicPlate::from_payload(coord, payload),
            None => Ok(TectonicPlate::new(coord)),
        });
        let plate = match loaded {
            Ok(plate) => plate,
            Err(err) => {
                self.forget_vacant(coord, &slot);
                return Err(err);
            }
        };
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        debug!(plate = %coord, sections = plate.section_count(), "Plate loaded");

        let plate = Arc::new(plate);
        plate.touch(self.now_ms());
        *guard = Some(Arc::clone(&plate));
        self.loaded.fetch_add(1, Ordering::Relaxed);
        Ok(plate)
    }

    /// Reference heights for every column of `chunk`, computing and caching
    /// them in the owning plate when absent.
    ///
    /// Missing samples are stored as NaN. The whole field is resolved before
    /// it is returned; callers never see a partial field.
    pub fn reference_heights<F>(&self, chunk: ChunkPos, sample: F) -> Result<Arc<[f64]>, MantleError>
    where
        F: Fn(i32, i32) -> Option<f64> + Sync,
    {
        let plate = self.get(chunk.plate())?;
        if let Some(field) = plate.height_field(chunk) {
            return Ok(field);
        }

        let (ox, oz) = (chunk.origin_x(), chunk.origin_z());
        let heights: Vec<f64> = (0..CHUNK_COLUMNS)
            .into_par_iter()
            .map(|i| {
                let x = ox + (i % CHUNK_SIZE_X) as i32;
                let z = oz + (i / CHUNK_SIZE_X) as i32;
                sample(x, z).unwrap_or(f64::NAN)
            })
            .collect();
        Ok(plate.store_height_field(chunk, heights))
    }

    /// Whether a loaded plate for `coord` is in memory.
    pub fn is_resident(&self, coord: PlateCoord) -> bool {
        let slot = self.lock_index().slots.get(&coord).cloned();
        slot.is_some_and(|slot| slot.lock().is_some())
    }

    /// Number of loaded plates in memory.
    pub fn resident(&self) -> usize {
        self.loaded.load(Ordering::Relaxed)
    }

    /// Compact up to `budget` resident plates, least recently trimmed first.
    ///
    /// Plates stay resident; only sections untouched since their plate's
    /// previous trim are dropped. Returns the number of dropped sections.
    #[instrument(skip(self), level = "debug")]
    pub fn trim(&self, budget: usize) -> usize {
        let mut plates: Vec<Arc<TectonicPlate>> = {
            let index = self.lock_index();
            index
                .slots
                .values()
                .filter_map(|slot| slot.plate.try_lock().ok()?.as_ref().map(Arc::clone))
                .collect()
        };
        plates.sort_by_key(|plate| plate.last_trim());
        plates.truncate(budget);

        let pass = self.trim_pass.fetch_add(1, Ordering::Relaxed) + 1;
        let dropped: usize = plates.iter().map(|plate| plate.trim(pass)).sum();
        self.counters
            .trimmed_sections
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(plates = plates.len(), dropped, "Trim pass finished");
        dropped
    }

    /// Unload least recently used plates until at most `budget` remain, plus
    /// up to `budget` plates idle longer than the configured idle timeout.
    ///
    /// Dirty plates are persisted before removal. Plates currently held by a
    /// caller are skipped until a later pass. Persist failures do not stop the
    /// pass; the first one is returned after the remaining plates were tried.
    #[instrument(skip(self), level = "debug")]
    pub fn unload(&self, budget: usize) -> Result<usize, MantleError> {
        let now = self.now_ms();
        let idle_ms = self.settings.idle_unload.as_millis() as u64;

        let (mut resident, candidates) = {
            let index = self.lock_index();
            let candidates: Vec<(PlateCoord, Arc<PlateSlot>, bool)> = index
                .lru
                .iter()
                .rev()
                .filter_map(|(coord, _)| {
                    let slot = index.slots.get(coord)?;
                    let expired = slot
                        .plate
                        .try_lock()
                        .ok()
                        .and_then(|guard| guard.as_ref().map(|p| p.last_access()))
                        .is_some_and(|last| now.saturating_sub(last) >= idle_ms);
                    Some((*coord, Arc::clone(slot), expired))
                })
                .collect();
            (self.resident(), candidates)
        };

        let mut idle_budget = budget;
        let mut unloaded = 0;
        let mut first_error = None;
        for (coord, slot, expired) in candidates {
            let over = resident > budget;
            if !over && !(expired && idle_budget > 0) {
                continue;
            }
            match self.evict(coord, &slot) {
                Ok(Eviction::Unloaded) => {
                    resident -= 1;
                    unloaded += 1;
                    if !over {
                        idle_budget -= 1;
                    }
                }
                Ok(Eviction::Vacant | Eviction::Held) => {}
                Err(err) => {
                    warn!(plate = %coord, error = %err, "Failed to persist plate before unload");
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(unloaded, resident, budget, "Unload pass finished");
        match first_error {
            Some(err) => Err(err),
            None => Ok(unloaded),
        }
    }

    /// Persist every dirty resident plate without unloading it.
    pub fn flush(&self) -> Result<usize, MantleError> {
        let slots: Vec<(PlateCoord, Arc<PlateSlot>)> = {
            let index = self.lock_index();
            index
                .slots
                .iter()
                .map(|(coord, slot)| (*coord, Arc::clone(slot)))
                .collect()
        };

        let mut written = 0;
        for (coord, slot) in slots {
            let guard = slot.lock();
            if let Some(plate) = guard.as_ref() {
                if self.persist_if_dirty(coord, plate)? {
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> MantleStats {
        MantleStats {
            resident: self.resident(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            trimmed_sections: self.counters.trimmed_sections.load(Ordering::Relaxed),
            unloaded: self.counters.unloaded.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
        }
    }

    /// Remove one slot from the index.
    fn evict(&self, coord: PlateCoord, slot: &Arc<PlateSlot>) -> Result<Eviction, MantleError> {
        let guard = slot.lock();
        if let Some(plate) = guard.as_ref() {
            if Arc::strong_count(plate) > 1 {
                return Ok(Eviction::Held);
            }
            self.persist_if_dirty(coord, plate)?;
        }

        let mut index = self.lock_index();
        let same_slot = index
            .slots
            .get(&coord)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        // The index and this pass hold the only references; anyone else is
        // about to wait on the slot for this plate.
        if !same_slot || Arc::strong_count(slot) > 2 {
            return Ok(Eviction::Held);
        }
        if let Some(plate) = guard.as_ref() {
            if Arc::strong_count(plate) > 1 || plate.is_dirty() {
                return Ok(Eviction::Held);
            }
        }

        index.slots.remove(&coord);
        index.lru.pop(&coord);
        if guard.is_none() {
            return Ok(Eviction::Vacant);
        }
        self.loaded.fetch_sub(1, Ordering::Relaxed);
        self.counters.unloaded.fetch_add(1, Ordering::Relaxed);
        debug!(plate = %coord, "Plate unloaded");
        Ok(Eviction::Unloaded)
    }

    /// Drop the empty slot a failed load leaves behind, unless another caller
    /// is already waiting on it to retry. Called with the slot locked.
    fn forget_vacant(&self, coord: PlateCoord, slot: &Arc<PlateSlot>) {
        let mut index = self.lock_index();
        let ours = index
            .slots
            .get(&coord)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if ours && Arc::strong_count(slot) <= 2 {
            index.slots.remove(&coord);
            index.lru.pop(&coord);
        }
    }

    fn persist_if_dirty(
        &self,
        coord: PlateCoord,
        plate: &TectonicPlate,
    ) -> Result<bool, MantleError> {
        if !plate.take_dirty() {
            return Ok(false);
        }
        if let Err(err) = self.store.persist(coord, &plate.snapshot()) {
            plate.mark_dirty();
            return Err(err);
        }
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn lock_index(&self) -> MutexGuard<'_, PlateIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for Mantle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mantle")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}
