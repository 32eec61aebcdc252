//! Block identifiers used by the synthesizer and its collaborators.
//!
//! The registry that maps names to ids lives outside this workspace; these
//! constants cover the handful of ids the core itself has to know about plus
//! the defaults used by the bundled layer tables.

/// Block identifier referencing the host registry.
pub type BlockId = u16;

/// Reserved ID for air. Chunk buffers start out filled with it.
pub const BLOCK_AIR: BlockId = 0;

pub const AIR: BlockId = BLOCK_AIR;
pub const STONE: BlockId = 1;
pub const DIRT: BlockId = 2;
pub const GRASS: BlockId = 3;
pub const SAND: BlockId = 4;
pub const GRAVEL: BlockId = 5;
pub const WATER: BlockId = 6;
pub const ICE: BlockId = 7;
pub const SNOW: BlockId = 8;
pub const BEDROCK: BlockId = 10;

pub const COAL_ORE: BlockId = 14;
pub const IRON_ORE: BlockId = 15;
pub const GOLD_ORE: BlockId = 16;
pub const DIAMOND_ORE: BlockId = 17;

/// Returns true for ids that count as empty space.
#[inline]
pub fn is_air(id: BlockId) -> bool {
    id == BLOCK_AIR
}
