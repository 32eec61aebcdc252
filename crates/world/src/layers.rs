//! Layer providers: the block sequences laid onto a column by depth, and the
//! ore substitutions applied below them.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use strata_core::blocks;
use strata_core::{BlockId, WorldRng};

use crate::{BiomeId, ColumnSample, RegionId};

/// Supplies the solid and sea strata of a column.
///
/// Both sequences are indexed by depth: entry 0 sits at the reference level
/// (surface or fluid top) and later entries go downwards. Implementations must
/// draw randomness only from `rng` keyed by the column so results do not
/// depend on generation order.
pub trait LayerProvider: Send + Sync {
    /// Blocks below the surface, indexed by depth from the surface.
    fn solid_layers(
        &self,
        biome: BiomeId,
        x: i32,
        z: i32,
        rng: &WorldRng,
        surface: i32,
    ) -> Vec<BlockId>;

    /// Blocks below the fluid top, indexed by depth from it. `flood` is the
    /// thickness of the flooded range.
    fn sea_layers(&self, biome: BiomeId, x: i32, z: i32, rng: &WorldRng, flood: i32)
        -> Vec<BlockId>;
}

/// One scope of ore substitution (a biome's, a region's or the dimension's).
pub trait OreProvider: Send + Sync {
    /// Ore to place at `(x, level, z)`, if this scope wants one there.
    fn ore_at(
        &self,
        column: &ColumnSample,
        x: i32,
        level: i32,
        z: i32,
        rng: &WorldRng,
    ) -> Option<BlockId>;
}

/// Randomly placed ore within a height band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OreVein {
    /// Ore block.
    pub block: BlockId,
    /// Lowest level (inclusive).
    #[serde(default)]
    pub min_y: i32,
    /// Highest level (inclusive).
    pub max_y: i32,
    /// Probability per eligible block, `0.0..=1.0`.
    pub chance: f64,
}

impl OreVein {
    /// Create a vein.
    pub fn new(block: BlockId, min_y: i32, max_y: i32, chance: f64) -> Self {
        Self {
            block,
            min_y,
            max_y,
            chance,
        }
    }

    /// Overworld defaults: rarer ores sit deeper.
    pub fn defaults() -> Vec<OreVein> {
        vec![
            OreVein::new(blocks::DIAMOND_ORE, 1, 16, 0.001),
            OreVein::new(blocks::GOLD_ORE, 1, 32, 0.003),
            OreVein::new(blocks::IRON_ORE, 1, 64, 0.007),
            OreVein::new(blocks::COAL_ORE, 1, 128, 0.01),
        ]
    }
}

/// Roll a list of veins for one block; the first hit wins.
fn roll_veins(veins: &[OreVein], salt: u64, x: i32, level: i32, z: i32, rng: &WorldRng) -> Option<BlockId> {
    veins.iter().enumerate().find_map(|(i, vein)| {
        if level < vein.min_y || level > vein.max_y || vein.chance <= 0.0 {
            return None;
        }
        let roll: f64 = rng.fork(salt + i as u64).block(x, level, z).gen();
        (roll < vein.chance).then_some(vein.block)
    })
}

const BIOME_ORE_SALT: u64 = 0x0B10_0000;
const REGION_ORE_SALT: u64 = 0x0EE6_0000;
const DIMENSION_ORE_SALT: u64 = 0x0D13_0000;

/// Ores keyed by the column's biome.
#[derive(Debug, Clone, Default)]
pub struct BiomeOres {
    veins: HashMap<BiomeId, Vec<OreVein>>,
}

impl BiomeOres {
    /// Build from per-biome vein lists.
    pub fn new(veins: HashMap<BiomeId, Vec<OreVein>>) -> Self {
        Self { veins }
    }
}

impl OreProvider for BiomeOres {
    fn ore_at(&self, column: &ColumnSample, x: i32, level: i32, z: i32, rng: &WorldRng) -> Option<BlockId> {
        let veins = self.veins.get(&column.biome)?;
        roll_veins(veins, BIOME_ORE_SALT, x, level, z, rng)
    }
}

/// Ores keyed by the column's region.
#[derive(Debug, Clone, Default)]
pub struct RegionOres {
    veins: HashMap<RegionId, Vec<OreVein>>,
}

impl RegionOres {
    /// Build from per-region vein lists.
    pub fn new(veins: HashMap<RegionId, Vec<OreVein>>) -> Self {
        Self { veins }
    }
}

impl OreProvider for RegionOres {
    fn ore_at(&self, column: &ColumnSample, x: i32, level: i32, z: i32, rng: &WorldRng) -> Option<BlockId> {
        let veins = self.veins.get(&column.region)?;
        roll_veins(veins, REGION_ORE_SALT, x, level, z, rng)
    }
}

/// Ores shared by the whole dimension.
#[derive(Debug, Clone, Default)]
pub struct DimensionOres {
    veins: Vec<OreVein>,
}

impl DimensionOres {
    /// Build from one vein list.
    pub fn new(veins: Vec<OreVein>) -> Self {
        Self { veins }
    }
}

impl OreProvider for DimensionOres {
    fn ore_at(&self, _column: &ColumnSample, x: i32, level: i32, z: i32, rng: &WorldRng) -> Option<BlockId> {
        roll_veins(&self.veins, DIMENSION_ORE_SALT, x, level, z, rng)
    }
}

/// Ordered ore scopes; the first provider with a result wins.
#[derive(Clone, Default)]
pub struct OreChain {
    providers: Vec<Arc<dyn OreProvider>>,
}

impl OreChain {
    /// An empty chain that never places ore.
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual precedence: biome, then region, then dimension.
    pub fn standard(
        biome: impl OreProvider + 'static,
        region: impl OreProvider + 'static,
        dimension: impl OreProvider + 'static,
    ) -> Self {
        Self::new().with(biome).with(region).with(dimension)
    }

    /// Append a provider with lower precedence than the existing ones.
    pub fn with(mut self, provider: impl OreProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Number of scopes in the chain.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true when the chain has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// First ore any scope places at this block.
    pub fn resolve(
        &self,
        column: &ColumnSample,
        x: i32,
        level: i32,
        z: i32,
        rng: &WorldRng,
    ) -> Option<BlockId> {
        self.providers
            .iter()
            .find_map(|provider| provider.ore_at(column, x, level, z, rng))
    }
}

impl std::fmt::Debug for OreChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OreChain")
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Surface and sea sequences for one biome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiomeLayers {
    /// Blocks from the surface downwards.
    #[serde(default)]
    pub surface: Vec<BlockId>,
    /// Blocks from the fluid top downwards.
    #[serde(default)]
    pub sea: Vec<BlockId>,
}

impl BiomeLayers {
    /// Create from both sequences.
    pub fn new(surface: Vec<BlockId>, sea: Vec<BlockId>) -> Self {
        Self { surface, sea }
    }
}

/// Table-driven [`LayerProvider`] keyed by biome.
///
/// With `jitter > 0` the deepest surface block is repeated up to `jitter`
/// extra times, chosen per column.
#[derive(Debug, Clone)]
pub struct BiomeLayerTable {
    biomes: HashMap<BiomeId, BiomeLayers>,
    fallback: BiomeLayers,
    jitter: u32,
}

impl BiomeLayerTable {
    /// Table with no biome entries using `fallback` everywhere.
    pub fn new(fallback: BiomeLayers) -> Self {
        Self {
            biomes: HashMap::new(),
            fallback,
            jitter: 0,
        }
    }

    /// Layers for the biomes the bundled noise sampler produces.
    pub fn standard() -> Self {
        Self::new(BiomeLayers::new(
            vec![blocks::GRASS, blocks::DIRT, blocks::DIRT, blocks::DIRT],
            Vec::new(),
        ))
        .with_biome(
            BiomeId::ARID,
            BiomeLayers::new(
                vec![blocks::SAND, blocks::SAND, blocks::SAND, blocks::SAND],
                Vec::new(),
            ),
        )
        .with_biome(
            BiomeId::FROZEN,
            BiomeLayers::new(vec![blocks::SNOW, blocks::DIRT, blocks::DIRT], vec![blocks::ICE]),
        )
        .with_jitter(2)
    }

    /// Set the layers of one biome.
    pub fn with_biome(mut self, biome: BiomeId, layers: BiomeLayers) -> Self {
        self.biomes.insert(biome, layers);
        self
    }

    /// Set the thickness jitter.
    pub fn with_jitter(mut self, jitter: u32) -> Self {
        self.jitter = jitter;
        self
    }

    fn layers(&self, biome: BiomeId) -> &BiomeLayers {
        self.biomes.get(&biome).unwrap_or(&self.fallback)
    }
}

const LAYER_JITTER_SALT: u64 = 0x1A7E_0000;

impl LayerProvider for BiomeLayerTable {
    fn solid_layers(&self, biome: BiomeId, x: i32, z: i32, rng: &WorldRng, _surface: i32) -> Vec<BlockId> {
        let mut layers = self.layers(biome).surface.clone();
        if self.jitter > 0 {
            if let Some(&deepest) = layers.last() {
                let extra = rng.fork(LAYER_JITTER_SALT).column(x, z).gen_range(0..=self.jitter);
                layers.extend(std::iter::repeat(deepest).take(extra as usize));
            }
        }
        layers
    }

    fn sea_layers(&self, biome: BiomeId, _x: i32, _z: i32, _rng: &WorldRng, flood: i32) -> Vec<BlockId> {
        let sea = &self.layers(biome).sea;
        sea.iter().take(flood.max(0) as usize).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BiomeId, RegionId};

    fn column(biome: u16, region: u16) -> ColumnSample {
        ColumnSample {
            height: Some(64.0),
            biome: BiomeId(biome),
            region: RegionId(region),
            fluid: blocks::WATER,
            rock: blocks::STONE,
        }
    }

    fn certain(block: BlockId) -> Vec<OreVein> {
        vec![OreVein::new(block, 0, 255, 1.0)]
    }

    #[test]
    fn chain_prefers_earlier_scopes() {
        let chain = OreChain::standard(
            BiomeOres::new(HashMap::from([(BiomeId(1), certain(blocks::DIAMOND_ORE))])),
            RegionOres::new(HashMap::from([(RegionId(1), certain(blocks::GOLD_ORE))])),
            DimensionOres::new(certain(blocks::COAL_ORE)),
        );
        let rng = WorldRng::new(9);
        assert_eq!(chain.resolve(&column(1, 1), 0, 10, 0, &rng), Some(blocks::DIAMOND_ORE));
        assert_eq!(chain.resolve(&column(0, 1), 0, 10, 0, &rng), Some(blocks::GOLD_ORE));
        assert_eq!(chain.resolve(&column(0, 0), 0, 10, 0, &rng), Some(blocks::COAL_ORE));
    }

    #[test]
    fn veins_respect_height_band() {
        let ores = DimensionOres::new(vec![OreVein::new(blocks::IRON_ORE, 5, 10, 1.0)]);
        let rng = WorldRng::new(1);
        assert_eq!(ores.ore_at(&column(0, 0), 0, 4, 0, &rng), None);
        assert_eq!(ores.ore_at(&column(0, 0), 0, 5, 0, &rng), Some(blocks::IRON_ORE));
        assert_eq!(ores.ore_at(&column(0, 0), 0, 11, 0, &rng), None);
    }

    #[test]
    fn ore_rolls_are_keyed_by_position() {
        let ores = DimensionOres::new(vec![OreVein::new(blocks::COAL_ORE, 0, 255, 0.5)]);
        let rng = WorldRng::new(77);
        let first: Vec<_> = (0..64).map(|y| ores.ore_at(&column(0, 0), 3, y, -8, &rng)).collect();
        let second: Vec<_> = (0..64).rev().map(|y| ores.ore_at(&column(0, 0), 3, y, -8, &rng)).collect();
        let second: Vec<_> = second.into_iter().rev().collect();
        assert_eq!(first, second);
        assert!(first.iter().any(Option::is_some));
        assert!(first.iter().any(Option::is_none));
    }

    #[test]
    fn sea_layers_never_exceed_flood() {
        let table = BiomeLayerTable::new(BiomeLayers::new(vec![], vec![1, 2, 3]));
        let rng = WorldRng::new(0);
        assert_eq!(table.sea_layers(BiomeId(0), 0, 0, &rng, 2), vec![1, 2]);
        assert!(table.sea_layers(BiomeId(0), 0, 0, &rng, 0).is_empty());
    }

    #[test]
    fn jitter_only_extends_deepest_layer() {
        let table = BiomeLayerTable::standard();
        let rng = WorldRng::new(3);
        for x in 0..32 {
            let layers = table.solid_layers(BiomeId::TEMPERATE, x, 0, &rng, 64);
            assert!((4..=6).contains(&layers.len()));
            assert_eq!(layers[0], blocks::GRASS);
            assert!(layers[1..].iter().all(|b| *b == blocks::DIRT));
        }
    }
}
