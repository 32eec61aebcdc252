#![warn(missing_docs)]
//! The mantle: a concurrent cache of tectonic plates plus the background
//! loops that keep it inside its memory share.

mod capacity;
mod cleaner;
mod error;
mod mantle;
mod plate;
mod region;
mod registry;
mod store;

pub use capacity::{
    available_memory_mb, tectonic_limit, tectonic_limit_for, MB_PER_PLATE, MIN_TECTONIC_LIMIT,
};
pub use cleaner::{
    pass_budget, pass_delay, CleanerSettings, LoopState, Maintainable, MantleCleaner,
    TARGET_CYCLE,
};
pub use error::MantleError;
pub use mantle::{Mantle, MantleSettings, MantleStats};
pub use plate::{PlatePayload, SectionRecord, TectonicPlate, SECTION_COUNT};
pub use region::RegionPlateStore;
pub use registry::{EngineLease, EngineRegistry};
pub use store::{MemoryPlateStore, PlateStore};
