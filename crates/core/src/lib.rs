#![warn(missing_docs)]
//! Core primitives shared across the workspace.

#[allow(missing_docs)]
pub mod blocks;
mod coords;
mod metrics;
mod panic;
mod rng;

pub use blocks::{BlockId, BLOCK_AIR};
pub use coords::{
    ChunkPos, PlateCoord, CHUNK_COLUMNS, CHUNK_SIZE_X, CHUNK_SIZE_Z, PLATE_SIZE_CHUNKS,
};
pub use metrics::RollingAverage;
pub use panic::panic_message;
pub use rng::WorldRng;
