use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use strata_core::BlockId;
use strata_mantle::MantleSettings;
use strata_world::{
    BiomeId, BiomeLayerTable, BiomeLayers, BiomeOres, DimensionOres, DimensionSettings,
    MergeSettings, OreChain, OreVein, RegionId, RegionOres,
};
use tracing::warn;

use crate::EngineError;

/// Tallest dimension an engine accepts.
pub const MAX_DIMENSION_HEIGHT: usize = 4096;

/// Everything needed to open an [`crate::Engine`], loaded from TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name, used in logs and thread names.
    pub name: String,
    /// World seed.
    pub seed: u64,
    pub dimension: DimensionConfig,
    pub mantle: MantleConfig,
    pub performance: PerformanceConfig,
    /// Extra blocks the deepest surface layer may repeat, chosen per column.
    pub layer_jitter: u32,
    /// Per-biome layer and ore overrides.
    pub biomes: Vec<BiomeConfig>,
    /// Per-region ores.
    pub regions: Vec<RegionConfig>,
    /// Dimension-wide ores, consulted after biome and region ores.
    pub ores: Vec<OreVein>,
}

/// Vertical layout plus merge policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DimensionConfig {
    pub height: usize,
    pub fluid_height: i32,
    pub bedrock: bool,
    pub merge: MergeSettings,
}

/// Plate cache and its backing store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MantleConfig {
    /// Directory for plate files; plates stay in memory when unset.
    pub store_dir: Option<PathBuf>,
    /// Memory to size the plate limit from instead of measuring it.
    pub memory_mb: Option<u64>,
    /// Seconds a plate may sit unused before it is unloaded.
    pub idle_unload_secs: u64,
    /// zstd level for plate files.
    pub compression_level: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Preview mode: background maintenance stays off.
    pub studio: bool,
    /// Keep maintenance running in studio mode anyway.
    pub trim_mantle_in_studio: bool,
    /// Generation worker threads; 0 picks one per core.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BiomeConfig {
    pub id: u16,
    #[serde(default)]
    pub surface: Vec<BlockId>,
    #[serde(default)]
    pub sea: Vec<BlockId>,
    #[serde(default)]
    pub ores: Vec<OreVein>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegionConfig {
    pub id: u16,
    #[serde(default)]
    pub ores: Vec<OreVein>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "overworld".to_string(),
            seed: 0,
            dimension: DimensionConfig::default(),
            mantle: MantleConfig::default(),
            performance: PerformanceConfig::default(),
            layer_jitter: 2,
            biomes: Vec::new(),
            regions: Vec::new(),
            ores: OreVein::defaults(),
        }
    }
}

impl Default for DimensionConfig {
    fn default() -> Self {
        let layout = DimensionSettings::default();
        Self {
            height: layout.height,
            fluid_height: layout.fluid_height,
            bedrock: layout.bedrock,
            merge: MergeSettings::default(),
        }
    }
}

impl DimensionConfig {
    /// Layout handed to the synthesizer.
    pub fn layout(&self) -> DimensionSettings {
        DimensionSettings {
            height: self.height,
            fluid_height: self.fluid_height,
            bedrock: self.bedrock,
        }
    }
}

impl Default for MantleConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            memory_mb: None,
            idle_unload_secs: 60,
            compression_level: 3,
        }
    }
}

impl MantleConfig {
    /// Cache settings derived from this section.
    pub fn settings(&self) -> MantleSettings {
        MantleSettings {
            idle_unload: Duration::from_secs(self.idle_unload_secs),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(cfg) => cfg,
            Err(EngineError::ConfigRead { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!("Engine config not found at {}. Using defaults", path.display());
                Self::default()
            }
            Err(err) => {
                warn!("{err}. Using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a path, returning read and parse errors.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| EngineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Reject configurations an engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let height = self.dimension.height;
        if height == 0 || height > MAX_DIMENSION_HEIGHT {
            return Err(EngineError::InvalidConfig(format!(
                "dimension height {height} is outside 1..={MAX_DIMENSION_HEIGHT}"
            )));
        }
        for vein in self.all_veins() {
            if !(0.0..=1.0).contains(&vein.chance) {
                return Err(EngineError::InvalidConfig(format!(
                    "ore {} has chance {} outside 0..=1",
                    vein.block, vein.chance
                )));
            }
            if vein.min_y > vein.max_y {
                return Err(EngineError::InvalidConfig(format!(
                    "ore {} has min_y {} above max_y {}",
                    vein.block, vein.min_y, vein.max_y
                )));
            }
        }
        self.dimension.merge.validate()?;
        Ok(())
    }

    fn all_veins(&self) -> impl Iterator<Item = &OreVein> {
        self.ores
            .iter()
            .chain(self.biomes.iter().flat_map(|b| b.ores.iter()))
            .chain(self.regions.iter().flat_map(|r| r.ores.iter()))
    }

    /// Layer table: the bundled biome layers overridden by configured ones.
    pub fn layer_table(&self) -> BiomeLayerTable {
        self.biomes
            .iter()
            .filter(|biome| !biome.surface.is_empty() || !biome.sea.is_empty())
            .fold(BiomeLayerTable::standard(), |table, biome| {
                table.with_biome(
                    BiomeId(biome.id),
                    BiomeLayers::new(biome.surface.clone(), biome.sea.clone()),
                )
            })
            .with_jitter(self.layer_jitter)
    }

    /// Ore scopes in precedence order: biome, region, dimension.
    pub fn ore_chain(&self) -> OreChain {
        let biomes: HashMap<BiomeId, Vec<OreVein>> = self
            .biomes
            .iter()
            .filter(|biome| !biome.ores.is_empty())
            .map(|biome| (BiomeId(biome.id), biome.ores.clone()))
            .collect();
        let regions: HashMap<RegionId, Vec<OreVein>> = self
            .regions
            .iter()
            .map(|region| (RegionId(region.id), region.ores.clone()))
            .collect();
        OreChain::standard(
            BiomeOres::new(biomes),
            RegionOres::new(regions),
            DimensionOres::new(self.ores.clone()),
        )
    }
}
