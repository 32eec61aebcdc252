//! Tectonic plates: the unit of caching and eviction.
//!
//! A plate covers a `PLATE_SIZE_CHUNKS` x `PLATE_SIZE_CHUNKS` square of chunks.
//! Each chunk owns one section holding its dense per-column data. Sections are
//! filled lazily and may be dropped again by a trim pass; everything a section
//! holds can be recomputed from the samplers, so trimming never loses
//! authoritative data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use strata_core::{ChunkPos, PlateCoord, CHUNK_COLUMNS, PLATE_SIZE_CHUNKS};

use crate::MantleError;

/// Number of chunk sections in one plate.
pub const SECTION_COUNT: usize = (PLATE_SIZE_CHUNKS * PLATE_SIZE_CHUNKS) as usize;

struct Section {
    heights: Arc<[f64]>,
    /// Read or written since the last trim pass.
    touched: AtomicBool,
}

impl Section {
    fn new(heights: Arc<[f64]>) -> Self {
        Self {
            heights,
            touched: AtomicBool::new(true),
        }
    }
}

/// Serialized form of a plate handed to the backing store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatePayload {
    /// Populated sections, in ascending index order.
    pub sections: Vec<SectionRecord>,
}

/// One populated chunk section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    /// Index inside the plate (see [`ChunkPos::plate_section_index`]).
    pub index: u16,
    /// Reference height per column, `z * 16 + x`. NaN marks an absent sample.
    pub heights: Vec<f64>,
}

/// A cached tile of world data keyed by plate coordinates.
pub struct TectonicPlate {
    coord: PlateCoord,
    sections: RwLock<Vec<Option<Section>>>,
    dirty: AtomicBool,
    last_access: AtomicU64,
    last_trim: AtomicU64,
}

impl TectonicPlate {
    /// Create an empty, clean plate.
    pub fn new(coord: PlateCoord) -> Self {
        let mut sections = Vec::with_capacity(SECTION_COUNT);
        sections.resize_with(SECTION_COUNT, || None);
        Self {
            coord,
            sections: RwLock::new(sections),
            dirty: AtomicBool::new(false),
            last_access: AtomicU64::new(0),
            last_trim: AtomicU64::new(0),
        }
    }

    /// Rebuild a plate from a stored payload. The result is clean.
    pub fn from_payload(coord: PlateCoord, payload: PlatePayload) -> Result<Self, MantleError> {
        let plate = Self::new(coord);
        {
            let mut sections = plate.write_sections();
            for record in payload.sections {
                let index = record.index as usize;
                if index >= SECTION_COUNT {
                    return Err(MantleError::InvalidPayload {
                        coord,
                        reason: format!("section index {index} out of range"),
                    });
                }
                if record.heights.len() != CHUNK_COLUMNS {
                    return Err(MantleError::InvalidPayload {
                        coord,
                        reason: format!(
                            "section {index} has {} columns, expected {CHUNK_COLUMNS}",
                            record.heights.len()
                        ),
                    });
                }
                sections[index] = Some(Section::new(record.heights.into()));
            }
        }
        Ok(plate)
    }

    /// Key of this plate.
    #[inline]
    pub fn coord(&self) -> PlateCoord {
        self.coord
    }

    /// Cached reference-height field for a chunk inside this plate.
    pub fn height_field(&self, chunk: ChunkPos) -> Option<Arc<[f64]>> {
        debug_assert_eq!(chunk.plate(), self.coord);
        let sections = self.read_sections();
        sections[chunk.plate_section_index()].as_ref().map(|section| {
            section.touched.store(true, Ordering::Relaxed);
            Arc::clone(&section.heights)
        })
    }

    /// Store a reference-height field for a chunk and mark the plate dirty.
    ///
    /// # Panics
    /// Panics if `heights` does not hold exactly one value per column.
    pub fn store_height_field(&self, chunk: ChunkPos, heights: Vec<f64>) -> Arc<[f64]> {
        debug_assert_eq!(chunk.plate(), self.coord);
        assert_eq!(heights.len(), CHUNK_COLUMNS, "height field must cover the chunk");
        let heights: Arc<[f64]> = heights.into();
        {
            let mut sections = self.write_sections();
            sections[chunk.plate_section_index()] = Some(Section::new(Arc::clone(&heights)));
        }
        self.dirty.store(true, Ordering::Release);
        heights
    }

    /// Number of populated sections.
    pub fn section_count(&self) -> usize {
        self.read_sections().iter().filter(|s| s.is_some()).count()
    }

    /// Whether the plate holds changes the store has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning its previous value.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Drop sections nobody touched since the previous trim, recording `pass`
    /// as this plate's latest trim.
    pub fn trim(&self, pass: u64) -> usize {
        let mut dropped = 0;
        let mut sections = self.write_sections();
        for slot in sections.iter_mut() {
            let idle = match slot {
                Some(section) => !section.touched.swap(false, Ordering::Relaxed),
                None => false,
            };
            if idle {
                *slot = None;
                dropped += 1;
            }
        }
        self.last_trim.store(pass, Ordering::Relaxed);
        dropped
    }

    /// Copy the populated sections into a payload for persistence.
    pub fn snapshot(&self) -> PlatePayload {
        let sections = self.read_sections();
        let sections = sections
            .iter()
            .enumerate()
            .filter_map(|(index, section)| {
                section.as_ref().map(|section| SectionRecord {
                    index: index as u16,
                    heights: section.heights.to_vec(),
                })
            })
            .collect();
        PlatePayload { sections }
    }

    pub(crate) fn touch(&self, now_ms: u64) {
        self.last_access.fetch_max(now_ms, Ordering::Relaxed);
    }

    /// Milliseconds (mantle clock) of the latest access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Pass number of the latest trim (0 when never trimmed).
    pub fn last_trim(&self) -> u64 {
        self.last_trim.load(Ordering::Relaxed)
    }

    fn read_sections(&self) -> std::sync::RwLockReadGuard<'_, Vec<Option<Section>>> {
        self.sections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sections(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Option<Section>>> {
        self.sections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TectonicPlate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TectonicPlate")
            .field("coord", &self.coord)
            .field("sections", &self.section_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: f64) -> Vec<f64> {
        vec![value; CHUNK_COLUMNS]
    }

    #[test]
    fn new_plate_is_empty_and_clean() {
        let plate = TectonicPlate::new(PlateCoord::new(0, 0));
        assert_eq!(plate.section_count(), 0);
        assert!(!plate.is_dirty());
        assert!(plate.height_field(ChunkPos::new(3, 4)).is_none());
    }

    #[test]
    fn storing_a_field_marks_dirty() {
        let plate = TectonicPlate::new(PlateCoord::new(0, 0));
        plate.store_height_field(ChunkPos::new(1, 1), field(64.0));
        assert!(plate.is_dirty());
        assert!(plate.take_dirty());
        assert!(!plate.is_dirty());
        let heights = plate.height_field(ChunkPos::new(1, 1)).unwrap();
        assert_eq!(heights[0], 64.0);
    }

    #[test]
    fn trim_drops_only_idle_sections() {
        let plate = TectonicPlate::new(PlateCoord::new(-1, 0));
        let hot = ChunkPos::new(-1, 0);
        let cold = ChunkPos::new(-2, 0);
        plate.store_height_field(hot, field(1.0));
        plate.store_height_field(cold, field(2.0));

        // Both were written since the last trim.
        assert_eq!(plate.trim(10), 0);
        assert!(plate.height_field(hot).is_some());
        assert_eq!(plate.trim(20), 1);
        assert!(plate.height_field(cold).is_none());
        assert!(plate.height_field(hot).is_some());
        assert_eq!(plate.last_trim(), 20);
    }

    #[test]
    fn payload_roundtrip_preserves_sections() {
        let plate = TectonicPlate::new(PlateCoord::new(2, 2));
        plate.store_height_field(ChunkPos::new(64, 70), field(12.5));
        let payload = plate.snapshot();
        assert_eq!(payload.sections.len(), 1);

        let restored = TectonicPlate::from_payload(PlateCoord::new(2, 2), payload).unwrap();
        assert!(!restored.is_dirty());
        assert_eq!(restored.height_field(ChunkPos::new(64, 70)).unwrap()[5], 12.5);
    }

    #[test]
    fn from_payload_rejects_short_sections() {
        let payload = PlatePayload {
            sections: vec![SectionRecord {
                index: 0,
                heights: vec![0.0; 3],
            }],
        };
        let err = TectonicPlate::from_payload(PlateCoord::new(0, 0), payload).unwrap_err();
        assert!(matches!(err, MantleError::InvalidPayload { .. }));
    }

    #[test]
    fn from_payload_rejects_out_of_range_index() {
        let payload = PlatePayload {
            sections: vec![SectionRecord {
                index: SECTION_COUNT as u16,
                heights: field(0.0),
            }],
        };
        assert!(TectonicPlate::from_payload(PlateCoord::new(0, 0), payload).is_err());
    }
}
